use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which backing store answers a browsing request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The live filesystem of the running process.
    #[default]
    Runtime,
    /// The frozen snapshot captured at build time. Read-only.
    Build,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Runtime => f.write_str("runtime"),
            Source::Build => f.write_str("build"),
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runtime" => Ok(Source::Runtime),
            "build" => Ok(Source::Build),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Kind of a captured filesystem object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    /// Single-letter tag used in the snapshot file.
    pub fn tag(self) -> char {
        match self {
            EntryKind::Directory => 'd',
            EntryKind::File => 'f',
        }
    }
}

/// One line of the build snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Always 0 for directories.
    pub size: u64,
}

impl SnapshotEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Final path segment; `/` for the root.
    pub fn name(&self) -> &str {
        crate::path::file_name(&self.path)
    }
}

/// One child of a listed directory, shaped the same for both sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingItem {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_ms: Option<i64>,
}

impl ListingItem {
    pub fn from_entry(entry: &SnapshotEntry) -> Self {
        let name = entry.name().to_string();
        let is_dir = entry.is_dir();
        Self {
            ext: if is_dir { String::new() } else { extension_of(&name) },
            name,
            path: entry.path.clone(),
            is_dir,
            size: if is_dir { 0 } else { entry.size },
            modified_ms: None,
        }
    }
}

/// Lower-cased final dot-segment including the dot, or empty.
///
/// Dotfiles such as `.env` have no extension.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(idx) if idx + 1 == name.len() => String::new(),
        Some(idx) => name[idx..].to_lowercase(),
    }
}

/// Directories first, then case-insensitive ascending name.
pub fn sort_listing(items: &mut [ListingItem]) {
    items.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Bounded textual view of a runtime file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextView {
    pub path: String,
    pub content: String,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reconciled state of one audited tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Present in both phases at the same location.
    Match,
    /// Present in both phases, different location or version.
    Mismatch,
    /// Present at build time, absent at runtime.
    Missing,
    /// Deliberately excluded from the runtime image.
    Blocked,
    /// Absent from the build manifest, present at runtime.
    New,
    /// Absent in both phases.
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolRecord {
    pub name: String,
    pub build_path: Option<String>,
    pub build_version: Option<String>,
    pub runtime_path: Option<String>,
    /// First line of `<tool> --version`, probed only when the build recorded a version.
    pub runtime_version: Option<String>,
    pub status: ToolStatus,
}

/// Identity of an interpreter binary candidate, used to spot aliasing drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InodeRecord {
    pub path: String,
    pub runtime_inode: Option<u64>,
    pub resolved: Option<String>,
    pub build_inode: Option<u64>,
    pub drift: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageRecord {
    pub path: String,
    pub bytes: u64,
    pub human: String,
    pub percent_of_capacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub service: String,
    pub version: String,
    pub os: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_info: Option<String>,
    /// C library identity, e.g. `ldd (GNU libc) 2.36`.
    pub libc: Option<String>,
    /// Interpreter candidate path -> its `--version` line.
    #[serde(default)]
    pub language_runtimes: BTreeMap<String, String>,
}

/// Everything the `stats` operation reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsReport {
    pub runtime: RuntimeIdentity,
    pub tools: Vec<ToolRecord>,
    pub interpreters: Vec<InodeRecord>,
    pub storage: Vec<StorageRecord>,
    pub capacity_bytes: u64,
    pub snapshot_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, is_dir: bool) -> ListingItem {
        ListingItem {
            name: name.into(),
            path: format!("/{name}"),
            is_dir,
            size: 0,
            ext: String::new(),
            modified_ms: None,
        }
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension_of("main.PY"), ".py");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of(".env"), "");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of("trailing."), "");
    }

    #[test]
    fn directories_sort_first_then_case_insensitive() {
        let mut items = vec![
            item("b.txt", false),
            item("Zeta", true),
            item("A.txt", false),
            item("alpha", true),
        ];
        sort_listing(&mut items);
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["alpha", "Zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn source_parses_and_serializes() {
        assert_eq!("build".parse::<Source>().unwrap(), Source::Build);
        assert!("nope".parse::<Source>().is_err());
        assert_eq!(serde_json::to_string(&Source::Runtime).unwrap(), r#""runtime""#);
    }
}
