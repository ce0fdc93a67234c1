use std::fs::Metadata;
use std::path::PathBuf;

use crate::error::{ConsoleError, Operation, Result};
use crate::model::{SnapshotEntry, Source};
use crate::path;
use crate::snapshot::SnapshotIndex;

/// The store that answers a query, already looked up.
#[derive(Debug)]
pub enum Backing<'a> {
    /// A live filesystem object with its (symlink-following) metadata.
    Live { path: PathBuf, metadata: Metadata },
    /// A recorded snapshot entry.
    Snapshot(&'a SnapshotEntry),
}

impl Backing<'_> {
    pub fn is_dir(&self) -> bool {
        match self {
            Backing::Live { metadata, .. } => metadata.is_dir(),
            Backing::Snapshot(entry) => entry.is_dir(),
        }
    }
}

/// A normalised logical path together with its backing.
#[derive(Debug)]
pub struct Resolved<'a> {
    pub path: String,
    pub source: Source,
    pub backing: Backing<'a>,
}

/// Rejects operations the source does not permit, before touching any store.
pub fn authorize(op: Operation, source: Source) -> Result<()> {
    if op.allowed_on(source) {
        Ok(())
    } else {
        Err(ConsoleError::PolicyViolation { op, against: source })
    }
}

/// Decides which store answers `raw` for `source` and looks the path up.
pub fn resolve<'a>(
    op: Operation,
    raw: &str,
    source: Source,
    snapshot: &'a SnapshotIndex,
) -> Result<Resolved<'a>> {
    authorize(op, source)?;
    let path = path::normalize(raw)?;

    let backing = match source {
        Source::Runtime => {
            let metadata = std::fs::metadata(&path).map_err(|e| ConsoleError::from_io(e, &path))?;
            Backing::Live {
                path: PathBuf::from(&path),
                metadata,
            }
        }
        Source::Build => match snapshot.get(&path) {
            Some(entry) => Backing::Snapshot(entry),
            None => return Err(ConsoleError::NotInSnapshot(path)),
        },
    };

    Ok(Resolved {
        path,
        source,
        backing,
    })
}
