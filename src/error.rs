use std::path::PathBuf;

use thiserror::Error;

/// Failure while reading prompt files. Aborts the load, never a run.
#[derive(Error, Debug)]
pub(crate) enum LoadError {
    #[error("Prompt path not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to list prompt folder: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Prompt loading task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl LoadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single generation request. Captured on the entry.
#[derive(Error, Debug)]
pub(crate) enum GenerationError {
    /// Message reported by the API or by a collaborator, shown as-is.
    #[error("{0}")]
    Rejected(String),
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid response from image API: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Image data could not be decoded: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("No image was returned; the prompt may have been blocked")]
    NoImage,
}

#[derive(Error, Debug)]
pub(crate) enum ExportError {
    #[error("Nothing to export: no image was generated successfully")]
    NothingToExport,
    #[error("\"{0}\" has no generated image")]
    NotGenerated(String),
    #[error("An archive is already being created")]
    Busy,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to create the zip file: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub(crate) enum PipelineError {
    #[error("A generation run is in progress")]
    Busy,
}
