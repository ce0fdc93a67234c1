//! The only operations that touch live file contents. Runtime source only.

use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use crate::error::{ConsoleError, Operation, Result};
use crate::model::TextView;
use crate::resolve::{Backing, Resolved};

/// Bytes inspected for NUL when classifying content as binary.
pub const BINARY_SNIFF_BYTES: usize = 1024;

/// Message reported alongside binary content requested as text.
pub const BINARY_MESSAGE: &str = "binary file cannot be viewed as text";

fn live_file(resolved: &Resolved<'_>, op: Operation) -> Result<PathBuf> {
    match &resolved.backing {
        Backing::Live { metadata, .. } if metadata.is_dir() => {
            Err(ConsoleError::IsADirectory(resolved.path.clone()))
        }
        Backing::Live { path, .. } => Ok(path.clone()),
        Backing::Snapshot(_) => Err(ConsoleError::PolicyViolation {
            op,
            against: resolved.source,
        }),
    }
}

/// Removes one file. Directories are refused, never removed recursively.
pub fn delete(resolved: &Resolved<'_>) -> Result<()> {
    let file = live_file(resolved, Operation::Delete)?;
    fs::remove_file(&file).map_err(|e| ConsoleError::from_io(e, &resolved.path))?;
    tracing::info!(path = %resolved.path, "file deleted");
    Ok(())
}

/// Target of a streamed download: where to read and what to call it.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub file: PathBuf,
    pub file_name: String,
    pub size: u64,
}

pub fn download_target(resolved: &Resolved<'_>) -> Result<DownloadTarget> {
    let file = live_file(resolved, Operation::Download)?;
    let size = match &resolved.backing {
        Backing::Live { metadata, .. } => metadata.len(),
        Backing::Snapshot(_) => 0,
    };
    Ok(DownloadTarget {
        file_name: crate::path::file_name(&resolved.path).to_string(),
        file,
        size,
    })
}

/// Bounded read decoded as text.
///
/// Binary content is not an error: the lossy attempt is returned together
/// with an explanatory `error` string.
pub fn view_text(resolved: &Resolved<'_>, limit: usize) -> Result<TextView> {
    let file = live_file(resolved, Operation::View)?;
    let handle = File::open(&file).map_err(|e| ConsoleError::from_io(e, &resolved.path))?;

    // Sniff the full window even when the view limit is smaller.
    let window = limit.max(BINARY_SNIFF_BYTES);
    let mut buf = Vec::with_capacity(window.min(64 * 1024));
    handle
        .take(window as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(|e| ConsoleError::from_io(e, &resolved.path))?;

    let sniff = &buf[..buf.len().min(BINARY_SNIFF_BYTES)];
    let error = if sniff.contains(&0) {
        Some(BINARY_MESSAGE.to_string())
    } else {
        None
    };

    let truncated = buf.len() > limit;
    buf.truncate(limit);

    Ok(TextView {
        path: resolved.path.clone(),
        content: String::from_utf8_lossy(&buf).into_owned(),
        truncated,
        error,
    })
}
