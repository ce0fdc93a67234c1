use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::{ConsoleError, Result};
use crate::model::{extension_of, sort_listing, ListingItem};
use crate::path;
use crate::resolve::{Backing, Resolved};
use crate::snapshot::SnapshotIndex;

/// Immediate children of a resolved directory, directories first.
pub fn list(resolved: &Resolved<'_>, snapshot: &SnapshotIndex) -> Result<Vec<ListingItem>> {
    if !resolved.backing.is_dir() {
        return Err(ConsoleError::NotADirectory(resolved.path.clone()));
    }

    let mut items = match &resolved.backing {
        Backing::Live { path, .. } => list_live(&resolved.path, path)?,
        Backing::Snapshot(_) => snapshot
            .children(&resolved.path)
            .map(ListingItem::from_entry)
            .collect(),
    };
    sort_listing(&mut items);
    Ok(items)
}

fn list_live(logical: &str, dir: &Path) -> Result<Vec<ListingItem>> {
    let reader = fs::read_dir(dir).map_err(|e| ConsoleError::from_io(e, logical))?;

    let mut items = Vec::new();
    for entry in reader {
        let Ok(entry) = entry else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let child = path::join(logical, &name);
        // Follows symlinks; dangling ones are skipped.
        let Ok(meta) = fs::metadata(entry.path()) else {
            tracing::debug!(path = %child, "skipping entry without readable metadata");
            continue;
        };
        let is_dir = meta.is_dir();
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);

        items.push(ListingItem {
            ext: if is_dir { String::new() } else { extension_of(&name) },
            size: if is_dir { 0 } else { meta.len() },
            name,
            path: child,
            is_dir,
            modified_ms,
        });
    }
    Ok(items)
}
