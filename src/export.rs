use std::{
    collections::{HashMap, HashSet},
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{debug, info};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{error::ExportError, types::ResultEntry};

pub(crate) const IMAGE_EXTENSION: &str = "jpeg";
pub(crate) const ARCHIVE_NAME: &str = "image_batch_generator_results.zip";
const MAX_FILENAME_LEN: usize = 50;

/// Keeps `[A-Za-z0-9_.-]`, replaces everything else with `_`, lowercases and
/// truncates.
pub(crate) fn sanitize_filename(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect()
}

/// One unique file name per label, suffixing `_1`, `_2`, ... on collisions.
pub(crate) fn archive_entry_names<'a>(labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::new();
    for label in labels {
        let base = sanitize_filename(label);
        let mut count = next_suffix.get(&base).copied().unwrap_or(0);
        let mut name = if count > 0 {
            format!("{base}_{count}.{IMAGE_EXTENSION}")
        } else {
            format!("{base}.{IMAGE_EXTENSION}")
        };
        while taken.contains(&name) {
            count += 1;
            name = format!("{base}_{count}.{IMAGE_EXTENSION}");
        }
        next_suffix.insert(base, count + 1);
        taken.insert(name.clone());
        names.push(name);
    }
    names
}

/// Writes one generated image into `dir` as `file_name` and returns its path.
pub(crate) async fn save_image(
    dir: &Path,
    entry: &ResultEntry,
    file_name: &str,
) -> Result<PathBuf, ExportError> {
    let image = entry
        .image()
        .ok_or_else(|| ExportError::NotGenerated(entry.label.clone()))?;
    let path = dir.join(file_name);
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, image.as_bytes()).await?;
    debug!("Saved {}", path.display());
    Ok(path)
}

/// Saves every successful entry, with the archive's collision-free names.
/// One result per saved entry; a failed write does not stop the others.
pub(crate) async fn save_images(
    dir: &Path,
    entries: &[ResultEntry],
) -> Vec<(String, Result<PathBuf, ExportError>)> {
    let successful: Vec<_> = entries.iter().filter(|e| e.image().is_some()).collect();
    let names = archive_entry_names(successful.iter().map(|e| e.label.as_str()));
    let mut saved = Vec::with_capacity(names.len());
    for (entry, name) in successful.into_iter().zip(names) {
        saved.push((entry.label.clone(), save_image(dir, entry, &name).await));
    }
    saved
}

/// Zips every successful entry. Blocking; run it off the async threads.
pub(crate) fn build_archive(entries: &[ResultEntry]) -> Result<Vec<u8>, ExportError> {
    let successful: Vec<_> = entries.iter().filter_map(|e| e.image().map(|i| (e, i))).collect();
    if successful.is_empty() {
        return Err(ExportError::NothingToExport);
    }
    let names = archive_entry_names(successful.iter().map(|(e, _)| e.label.as_str()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for ((_, image), name) in successful.iter().zip(names) {
        zip.start_file(name, options)?;
        zip.write_all(image.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Archive export with an in-progress flag, so only one archive is built at a time.
#[derive(Clone, Default)]
pub(crate) struct Exporter {
    zipping: Arc<AtomicBool>,
}

struct ZippingGuard(Arc<AtomicBool>);

impl Drop for ZippingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Exporter {
    pub fn is_zipping(&self) -> bool {
        self.zipping.load(Ordering::SeqCst)
    }

    pub async fn export_archive(
        &self,
        entries: Vec<ResultEntry>,
        dest: &Path,
    ) -> Result<PathBuf, ExportError> {
        if self.zipping.swap(true, Ordering::SeqCst) {
            return Err(ExportError::Busy);
        }
        let _guard = ZippingGuard(Arc::clone(&self.zipping));

        let bytes = tokio::task::spawn_blocking(move || build_archive(&entries)).await??;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        info!("Wrote archive {} ({} bytes)", dest.display(), bytes.len());
        Ok(dest.to_path_buf())
    }
}
