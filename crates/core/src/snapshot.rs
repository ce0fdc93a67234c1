//! Load-once index over the flat build snapshot.
//!
//! File format, one entry per line:
//!
//! ```text
//! # envscope snapshot v1
//! d|0|/app
//! f|120|/app/main.py
//! ```
//!
//! The parent -> children grouping is built once at load, so a listing costs
//! time proportional to the number of children.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{ConsoleError, Result};
use crate::model::{EntryKind, SnapshotEntry};
use crate::path;

/// Header written by the capture step.
pub const SNAPSHOT_HEADER: &str = "# envscope snapshot v1";

/// Immutable, shareable view of one snapshot file.
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    entries: Vec<SnapshotEntry>,
    by_path: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    origin: Option<PathBuf>,
}

impl SnapshotIndex {
    /// An index with no entries; every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `file`. A missing file yields an empty index.
    pub fn load(file: &Path) -> Result<Self> {
        let shown = file.display().to_string();
        let handle = match File::open(file) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(snapshot = %shown, "snapshot index not found; build source is empty");
                return Ok(Self::empty());
            }
            Err(e) => return Err(ConsoleError::from_io(e, &shown)),
        };

        let mut index = Self::from_reader(BufReader::new(handle))?;
        index.origin = Some(file.to_path_buf());
        tracing::info!(
            snapshot = %shown,
            entries = index.len(),
            directories = index.children.len(),
            "snapshot index loaded"
        );
        Ok(index)
    }

    /// Parses a whole snapshot stream. Any malformed line rejects the stream.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut index = Self::default();
        for (n, line) in reader.lines().enumerate() {
            let line_no = n + 1;
            let line = line.map_err(|e| ConsoleError::MalformedSnapshot {
                line: line_no,
                reason: e.to_string(),
            })?;
            let Some(entry) = parse_line(&line).map_err(|reason| ConsoleError::MalformedSnapshot {
                line: line_no,
                reason,
            })?
            else {
                continue;
            };
            index.insert(entry).map_err(|reason| ConsoleError::MalformedSnapshot {
                line: line_no,
                reason,
            })?;
        }
        Ok(index)
    }

    fn insert(&mut self, entry: SnapshotEntry) -> std::result::Result<(), String> {
        if self.by_path.contains_key(&entry.path) {
            return Err(format!("duplicate path {}", entry.path));
        }
        let idx = self.entries.len();
        if let Some(parent) = path::parent(&entry.path) {
            self.children.entry(parent.to_string()).or_default().push(idx);
        }
        self.by_path.insert(entry.path.clone(), idx);
        self.entries.push(entry);
        Ok(())
    }

    /// Entry recorded at exactly `path`.
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Entries whose parent is exactly `dir`, in file order.
    pub fn children<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a SnapshotEntry> + 'a {
        self.children
            .get(dir)
            .into_iter()
            .flat_map(move |ids| ids.iter().map(move |&i| &self.entries[i]))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File the index was loaded from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

/// Parses one `KIND|SIZE|PATH` line. Blank and `#` lines yield `None`.
pub fn parse_line(line: &str) -> std::result::Result<Option<SnapshotEntry>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.splitn(3, '|');
    let (Some(kind), Some(size), Some(raw_path)) = (fields.next(), fields.next(), fields.next()) else {
        return Err("expected KIND|SIZE|PATH".to_string());
    };

    let kind = match kind {
        "d" => EntryKind::Directory,
        "f" => EntryKind::File,
        other => return Err(format!("unknown kind {other:?}")),
    };

    let size = match (kind, size) {
        (EntryKind::Directory, "") => 0,
        (_, s) => s.parse::<u64>().map_err(|_| format!("invalid size {s:?}"))?,
    };

    let normalized = path::normalize(raw_path).map_err(|e| e.to_string())?;
    if normalized != raw_path {
        return Err(format!("path {raw_path:?} is not normalised"));
    }

    Ok(Some(SnapshotEntry {
        path: normalized,
        kind,
        size: if kind == EntryKind::Directory { 0 } else { size },
    }))
}

/// Renders one entry in the canonical line format.
pub fn format_entry(entry: &SnapshotEntry) -> String {
    format!("{}|{}|{}", entry.kind.tag(), entry.size, entry.path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(text: &str) -> SnapshotIndex {
        SnapshotIndex::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn groups_children_by_parent() {
        let idx = index("# envscope snapshot v1\nd|0|/\nd|0|/app\nf|120|/app/main.py\nd|0|/app/lib\nf|3|/app/lib/x.py\n");
        assert_eq!(idx.len(), 5);
        let kids: Vec<_> = idx.children("/app").map(|e| e.path.as_str()).collect();
        assert_eq!(kids, ["/app/main.py", "/app/lib"]);
        assert_eq!(idx.children("/").count(), 1);
        assert_eq!(idx.children("/app/lib/x.py").count(), 0);
    }

    #[test]
    fn paths_may_contain_separator() {
        let idx = index("f|7|/weird|name\n");
        assert_eq!(idx.get("/weird|name").unwrap().size, 7);
    }

    #[test]
    fn directory_size_may_be_omitted() {
        let idx = index("d||/app\n");
        assert!(idx.get("/app").unwrap().is_dir());
    }

    #[test]
    fn malformed_line_rejects_whole_stream() {
        let err = SnapshotIndex::from_reader("d|0|/app\nx|1|/app/y\n".as_bytes()).unwrap_err();
        match err {
            ConsoleError::MalformedSnapshot { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_duplicates_and_unnormalised_paths() {
        assert!(SnapshotIndex::from_reader("d|0|/a\nd|0|/a\n".as_bytes()).is_err());
        assert!(SnapshotIndex::from_reader("d|0|/a/\n".as_bytes()).is_err());
        assert!(SnapshotIndex::from_reader("f|abc|/a\n".as_bytes()).is_err());
    }

    #[test]
    fn missing_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let idx = SnapshotIndex::load(&dir.path().join("absent.index")).unwrap();
        assert!(idx.is_empty());
        assert!(idx.origin().is_none());
    }

    #[test]
    fn format_matches_parse() {
        let entry = SnapshotEntry {
            path: "/app/main.py".into(),
            kind: EntryKind::File,
            size: 120,
        };
        let line = format_entry(&entry);
        assert_eq!(line, "f|120|/app/main.py");
        assert_eq!(parse_line(&line).unwrap(), Some(entry));
    }
}
