//! Audio files inside a job's work directory

use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

/// `YYMMDD_HHMM.wav`, the name handed to the decoder.
fn is_decoder_input(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".wav") else {
        return false;
    };
    stem.len() == 11
        && stem
            .chars()
            .enumerate()
            .all(|(i, c)| if i == 6 { c == '_' } else { c.is_ascii_digit() })
}

/// Whether `name` is audio this service creates in a work directory.
pub fn is_job_audio(name: &str) -> bool {
    name.ends_with("_wspr.wav") || name.ends_with("_wspr_12k.wav") || is_decoder_input(name)
}

/// Delete job audio in `dir`, leaving anything listed in `keep`.
/// Returns how many files were removed.
pub async fn purge_audio(dir: &Path, keep: &HashSet<PathBuf>) -> Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_audio = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_job_audio);
        if !is_audio || keep.contains(&path) {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

/// Best-effort removal of the given files.
pub(super) async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => tracing::debug!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
}
