use std::sync::Arc;

use crate::error::{Operation, Result};
use crate::listing;
use crate::model::{ListingItem, Source, TextView};
use crate::mutate::{self, DownloadTarget};
use crate::resolve::resolve;
use crate::snapshot::SnapshotIndex;

/// Default cap on bytes returned by [`Explorer::view`].
pub const DEFAULT_VIEW_LIMIT: usize = 200_000;

/// Dual-source filesystem browser.
///
/// Cheap to clone; the snapshot is shared read-only between all requests.
#[derive(Debug, Clone)]
pub struct Explorer {
    snapshot: Arc<SnapshotIndex>,
    view_limit: usize,
}

impl Explorer {
    pub fn new(snapshot: Arc<SnapshotIndex>, view_limit: usize) -> Self {
        Self {
            snapshot,
            view_limit,
        }
    }

    pub fn snapshot(&self) -> &SnapshotIndex {
        &self.snapshot
    }

    pub fn list(&self, path: &str, source: Source) -> Result<Vec<ListingItem>> {
        let resolved = resolve(Operation::List, path, source, &self.snapshot)?;
        listing::list(&resolved, &self.snapshot)
    }

    pub fn view(&self, path: &str, source: Source) -> Result<TextView> {
        let resolved = resolve(Operation::View, path, source, &self.snapshot)?;
        mutate::view_text(&resolved, self.view_limit)
    }

    pub fn download(&self, path: &str, source: Source) -> Result<DownloadTarget> {
        let resolved = resolve(Operation::Download, path, source, &self.snapshot)?;
        mutate::download_target(&resolved)
    }

    pub fn delete(&self, path: &str, source: Source) -> Result<()> {
        let resolved = resolve(Operation::Delete, path, source, &self.snapshot)?;
        mutate::delete(&resolved)
    }
}
