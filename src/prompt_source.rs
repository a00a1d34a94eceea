use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::{error::LoadError, types::PromptEntry};

/// Only files with this suffix are read in folder mode.
pub(crate) const PROMPT_EXTENSION: &str = ".txt";

/// Loads prompts from a folder (one per file) or from a single file (one per line).
pub(crate) async fn load(path: &Path) -> Result<Vec<PromptEntry>, LoadError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::NotFound(path.to_path_buf()))
        }
        Err(err) => return Err(LoadError::io(path, err)),
    };
    let prompts = if metadata.is_dir() {
        load_folder(path).await?
    } else {
        load_file(path).await?
    };
    debug!("Loaded {} prompts from {}", prompts.len(), path.display());
    Ok(prompts)
}

pub(crate) async fn load_folder(dir: &Path) -> Result<Vec<PromptEntry>, LoadError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || read_folder(&dir)).await?
}

fn read_folder(dir: &Path) -> Result<Vec<PromptEntry>, LoadError> {
    let mut prompts = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !file_name.ends_with(PROMPT_EXTENSION) {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|e| LoadError::io(entry.path(), e))?;
        if let Some(prompt) = folder_entry(&file_name, &String::from_utf8_lossy(&bytes)) {
            prompts.push(prompt);
        }
    }
    Ok(prompts)
}

pub(crate) async fn load_file(path: &Path) -> Result<Vec<PromptEntry>, LoadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LoadError::io(path, e))?;
    Ok(parse_lines(&file_name(path), &String::from_utf8_lossy(&bytes)))
}

/// Folder mode: the whole file is one prompt, labeled with the file name.
pub(crate) fn folder_entry(file_name: &str, content: &str) -> Option<PromptEntry> {
    let text = content.trim();
    (!text.is_empty()).then(|| PromptEntry {
        label: file_name.to_string(),
        text: text.to_string(),
    })
}

/// Single-file mode. Blank lines are dropped before numbering, so `L<n>` is the
/// position among non-blank lines.
pub(crate) fn parse_lines(file_name: &str, content: &str) -> Vec<PromptEntry> {
    content
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| PromptEntry {
            label: format!("{file_name} (L{})", index + 1),
            text: line.to_string(),
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
