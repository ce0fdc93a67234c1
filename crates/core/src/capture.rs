//! Build-time capture of the snapshot index.
//!
//! Full roots are walked exhaustively, shallow roots only to `shallow_depth`
//! segments below the root, and anything under an excluded prefix is skipped
//! at any depth.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::audit::{probe_version, BuildObservation, ToolProbe};
use crate::model::{EntryKind, SnapshotEntry};
use crate::path;
use crate::snapshot::{format_entry, SNAPSHOT_HEADER};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturePolicy {
    pub full_roots: Vec<PathBuf>,
    pub shallow_roots: Vec<PathBuf>,
    pub shallow_depth: usize,
    pub exclude_prefixes: Vec<String>,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            full_roots: vec![],
            shallow_roots: [
                "/bin",
                "/sbin",
                "/usr/bin",
                "/usr/local/bin",
                "/lib",
                "/usr/lib",
                "/usr/local/lib",
                "/etc",
                "/opt",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            shallow_depth: 2,
            exclude_prefixes: ["/proc", "/sys", "/dev", "/tmp", "/run", "/var/cache", "/var/tmp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CapturePolicy {
    fn excluded(&self, logical: &str) -> bool {
        self.exclude_prefixes
            .iter()
            .any(|prefix| path::is_within(logical, prefix.trim_end_matches('/')))
    }
}

/// Walks every root of `policy`; entries come back sorted by path.
pub fn capture(policy: &CapturePolicy) -> Vec<SnapshotEntry> {
    let mut entries: BTreeMap<String, SnapshotEntry> = BTreeMap::new();

    let roots = policy
        .full_roots
        .iter()
        .map(|r| (r, None))
        .chain(policy.shallow_roots.iter().map(|r| (r, Some(policy.shallow_depth))));

    for (root, depth) in roots {
        walk_root(policy, root, depth, &mut entries);
    }

    entries.into_values().collect()
}

fn walk_root(
    policy: &CapturePolicy,
    root: &Path,
    depth: Option<usize>,
    out: &mut BTreeMap<String, SnapshotEntry>,
) {
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let Some(logical_root) = root.to_str().and_then(|r| path::normalize(r).ok()) else {
        tracing::warn!(root = %root.display(), "skipping root that is not an absolute UTF-8 path");
        return;
    };
    if policy.excluded(&logical_root) || !root.is_dir() {
        tracing::debug!(root = %logical_root, "capture root skipped");
        return;
    }

    // Ancestors keep every root reachable from `/`.
    let mut ancestor = path::parent(&logical_root);
    while let Some(dir) = ancestor {
        out.entry(dir.to_string()).or_insert_with(|| SnapshotEntry {
            path: dir.to_string(),
            kind: EntryKind::Directory,
            size: 0,
        });
        ancestor = path::parent(dir);
    }

    let mut walker = WalkDir::new(&root).follow_links(false);
    if let Some(d) = depth {
        walker = walker.max_depth(d);
    }

    let iter = walker.into_iter().filter_entry(|e| {
        e.path()
            .to_str()
            .map(|p| !policy.excluded(p))
            .unwrap_or(false)
    });

    let before = out.len();
    for entry in iter {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "capture walk error");
                continue;
            }
        };
        // Names with line breaks cannot be represented in the line format.
        let Some(logical) = entry
            .path()
            .to_str()
            .filter(|p| !p.contains(['\n', '\r']))
            .and_then(|p| path::normalize(p).ok())
        else {
            continue;
        };

        let ft = entry.file_type();
        let is_dir = ft.is_dir() || (ft.is_symlink() && entry.path().is_dir());
        let size = if is_dir {
            0
        } else {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        };
        out.insert(
            logical.clone(),
            SnapshotEntry {
                path: logical,
                kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
                size,
            },
        );
    }
    tracing::info!(root = %logical_root, depth = ?depth, added = out.len() - before, "captured root");
}

/// Writes entries in the canonical snapshot format.
pub fn write_snapshot<W: Write>(entries: &[SnapshotEntry], mut out: W) -> io::Result<()> {
    writeln!(out, "{SNAPSHOT_HEADER}")?;
    for entry in entries {
        writeln!(out, "{}", format_entry(entry))?;
    }
    out.flush()
}

/// Build-time tool manifest: name -> resolved path and `--version` line.
pub fn capture_tool_manifest(names: &[String], probe: &ToolProbe) -> BTreeMap<String, BuildObservation> {
    names
        .iter()
        .map(|name| {
            let located = probe.locate(name);
            let observation = BuildObservation {
                version: located.as_deref().and_then(probe_version),
                path: located.map(|p| p.display().to_string()),
            };
            (name.clone(), observation)
        })
        .collect()
}
