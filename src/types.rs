use std::{fmt, str::FromStr, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::GenerationError;

/// One prompt as read from disk. `text` is trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PromptEntry {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AspectRatio {
    #[default]
    Square,
    Landscape,
    Portrait,
    Widescreen,
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Widescreen,
        AspectRatio::Tall,
    ];

    /// Value sent to the API.
    pub fn as_str(self) -> &'static str {
        use AspectRatio::*;
        match self {
            Square => "1:1",
            Landscape => "4:3",
            Portrait => "3:4",
            Widescreen => "16:9",
            Tall => "9:16",
        }
    }

    pub fn label(self) -> &'static str {
        use AspectRatio::*;
        match self {
            Square => "1:1 (Square)",
            Landscape => "4:3 (Landscape)",
            Portrait => "3:4 (Portrait)",
            Widescreen => "16:9 (Widescreen)",
            Tall => "9:16 (Tall)",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == value)
            .ok_or_else(|| anyhow::anyhow!("Unrecognized aspect ratio: {value:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum PipelineStatus {
    #[default]
    Idle,
    Ready,
    Generating,
    Done,
}

/// Decoded image bytes. Clones share the buffer.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct ImageData(Arc<[u8]>);

impl ImageData {
    pub fn from_base64(encoded: &str) -> Result<Self, GenerationError> {
        let bytes = BASE64.decode(encoded.trim().as_bytes())?;
        Ok(Self(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
impl From<Vec<u8>> for ImageData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageData({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResultState {
    Pending,
    Generating,
    Success(ImageData),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResultEntry {
    pub label: String,
    pub text: String,
    pub state: ResultState,
}

impl ResultEntry {
    pub fn pending(prompt: &PromptEntry) -> Self {
        Self {
            label: prompt.label.clone(),
            text: prompt.text.clone(),
            state: ResultState::Pending,
        }
    }

    pub fn image(&self) -> Option<&ImageData> {
        match &self.state {
            ResultState::Success(image) => Some(image),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            ResultState::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.state == ResultState::Generating
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_parses_api_values() {
        for ratio in AspectRatio::ALL {
            assert_eq!(ratio.as_str().parse::<AspectRatio>().unwrap(), ratio);
        }
        assert_eq!(" 16:9 ".parse::<AspectRatio>().unwrap(), AspectRatio::Widescreen);
        assert!("2:1".parse::<AspectRatio>().is_err());
        assert_eq!(AspectRatio::default(), AspectRatio::Square);
    }

    #[test]
    fn image_data_decodes_base64() {
        let image = ImageData::from_base64("aGVsbG8=").unwrap();
        assert_eq!(image.as_bytes(), b"hello");
        assert_eq!(image.len(), 5);
        assert!(ImageData::from_base64("not base64!").is_err());
    }

    #[test]
    fn state_accessors_follow_variant() {
        let prompt = PromptEntry {
            label: "a.txt".to_string(),
            text: "cat".to_string(),
        };
        let mut entry = ResultEntry::pending(&prompt);
        assert!(entry.image().is_none());
        assert!(entry.error_message().is_none());

        entry.state = ResultState::Error("quota exceeded".to_string());
        assert_eq!(entry.error_message(), Some("quota exceeded"));

        entry.state = ResultState::Success(ImageData::from(vec![1, 2, 3]));
        assert_eq!(entry.image().map(ImageData::len), Some(3));
        assert!(entry.error_message().is_none());
    }
}
