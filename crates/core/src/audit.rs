//! Build-vs-runtime environment audit.
//!
//! Nothing here fails the whole report: an unreadable manifest is treated as
//! empty and an unavailable probe degrades a single record to `missing`.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::model::{
    InodeRecord, RuntimeIdentity, StatsReport, StorageRecord, ToolRecord, ToolStatus,
};
use crate::path;
use crate::snapshot::SnapshotIndex;

/// Tunables for one audit pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Audited when the build manifest is missing or empty.
    pub default_tools: Vec<String>,
    /// Tools deliberately kept out of the deployed image.
    pub blocked_tools: Vec<String>,
    /// Searched before `PATH` when probing the runtime.
    pub extra_search_paths: Vec<PathBuf>,
    /// Snapshot directories consulted for tools absent from the manifest.
    pub build_search_paths: Vec<String>,
    pub interpreter_candidates: Vec<PathBuf>,
    pub tracked_paths: Vec<PathBuf>,
    /// Storage ceiling as a size string, e.g. `250MB`.
    pub capacity: String,
    pub tool_manifest: PathBuf,
    pub inode_manifest: PathBuf,
    pub build_info: PathBuf,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            default_tools: ["tree", "jq", "curl", "git", "python3"]
                .into_iter()
                .map(String::from)
                .collect(),
            blocked_tools: vec![],
            extra_search_paths: vec![],
            build_search_paths: vec!["/usr/local/bin".into(), "/usr/bin".into(), "/bin".into()],
            interpreter_candidates: vec![
                "/usr/bin/python3".into(),
                "/usr/local/bin/python3".into(),
                "/bin/sh".into(),
            ],
            tracked_paths: vec![],
            capacity: "250MB".into(),
            tool_manifest: "build_tools.json".into(),
            inode_manifest: "build_inodes.json".into(),
            build_info: "build_env_info.txt".into(),
        }
    }
}

/// What the build phase recorded about one tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildObservation {
    pub path: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestValue {
    Path(String),
    Detailed {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
}

/// Tool name -> build-time observation.
#[derive(Debug, Clone, Default)]
pub struct ToolManifest {
    tools: BTreeMap<String, BuildObservation>,
}

impl ToolManifest {
    /// Accepts `name -> path`, `name -> {path, version}` or `name -> null`.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let raw: BTreeMap<String, Option<ManifestValue>> = serde_json::from_str(text)?;
        let tools = raw
            .into_iter()
            .map(|(name, value)| {
                let obs = match value {
                    None => BuildObservation::default(),
                    Some(ManifestValue::Path(p)) => BuildObservation {
                        path: Some(p).filter(|p| !p.is_empty()),
                        version: None,
                    },
                    Some(ManifestValue::Detailed { path, version }) => BuildObservation { path, version },
                };
                (name, obs)
            })
            .collect();
        Ok(Self { tools })
    }

    /// Missing or unreadable manifests yield an empty manifest.
    pub fn load(file: &Path) -> Self {
        let text = match fs::read_to_string(file) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(manifest = %file.display(), error = %e, "tool manifest unavailable");
                return Self::default();
            }
        };
        Self::from_json(&text).unwrap_or_else(|e| {
            tracing::warn!(manifest = %file.display(), error = %e, "tool manifest unreadable");
            Self::default()
        })
    }

    pub fn get(&self, name: &str) -> Option<&BuildObservation> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Resolves tool names against a search path the way a shell would.
#[derive(Debug, Clone)]
pub struct ToolProbe {
    search_path: OsString,
    cwd: PathBuf,
}

impl ToolProbe {
    /// `extra` directories followed by the process `PATH`.
    pub fn from_env(extra: &[PathBuf]) -> Self {
        let mut dirs: Vec<PathBuf> = extra.to_vec();
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        Self::with_dirs(&dirs)
    }

    pub fn with_dirs(dirs: &[PathBuf]) -> Self {
        let search_path = std::env::join_paths(dirs).unwrap_or_default();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self { search_path, cwd }
    }

    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        which::which_in(name, Some(&self.search_path), &self.cwd).ok()
    }
}

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const VERSION_OUTPUT_MAX: u64 = 4096;
const VERSION_LINE_MAX: usize = 200;

fn first_line<R: Read>(pipe: Option<R>) -> Option<String> {
    let mut buf = Vec::new();
    pipe?.take(VERSION_OUTPUT_MAX).read_to_end(&mut buf).ok()?;
    String::from_utf8_lossy(&buf)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(VERSION_LINE_MAX).collect())
}

/// First non-empty line of `<program> --version`, stdout before stderr.
///
/// The probe is killed after two seconds; a non-zero exit yields `None`.
pub fn probe_version(program: &Path) -> Option<String> {
    let mut child = match Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(program = %program.display(), error = %e, "version probe failed to start");
            return None;
        }
    };

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() < VERSION_PROBE_TIMEOUT => {
                thread::sleep(Duration::from_millis(20));
            }
            outcome => {
                tracing::debug!(program = %program.display(), ?outcome, "version probe abandoned");
                if let Err(e) = child.kill() {
                    tracing::debug!(error = %e, "version probe already exited");
                }
                let _ = child.wait();
                return None;
            }
        }
    };
    if !status.success() {
        return None;
    }
    first_line(child.stdout.take()).or_else(|| first_line(child.stderr.take()))
}

/// A recorded version agrees with a probed `--version` line when the line
/// carries it as a whole version (`1.7` in `jq-1.7`, never in `jq-1.7.1`).
pub fn versions_agree(build: &str, runtime: &str) -> bool {
    let build = build.trim();
    if build.is_empty() {
        return true;
    }
    let edge = |c: Option<char>| !c.is_some_and(|c| c.is_ascii_digit() || c == '.');
    runtime.match_indices(build).any(|(at, _)| {
        edge(runtime[..at].chars().next_back()) && edge(runtime[at + build.len()..].chars().next())
    })
}

/// Joins one tool's build and runtime observations.
///
/// Versions are compared only when both phases reported one.
pub fn classify(
    build: Option<&BuildObservation>,
    runtime: Option<&str>,
    runtime_version: Option<&str>,
    blocked: bool,
) -> ToolStatus {
    let build_path = build.and_then(|b| b.path.as_deref());
    let build_version = build.and_then(|b| b.version.as_deref());
    let version_differs = matches!(
        (build_version, runtime_version),
        (Some(b), Some(r)) if !versions_agree(b, r)
    );
    match (build_path, runtime) {
        (Some(b), Some(r)) if b == r && !version_differs => ToolStatus::Match,
        (Some(_), Some(_)) => ToolStatus::Mismatch,
        (Some(_), None) if blocked => ToolStatus::Blocked,
        (Some(_), None) => ToolStatus::Missing,
        (None, Some(_)) => ToolStatus::New,
        (None, None) if blocked => ToolStatus::Blocked,
        (None, None) => ToolStatus::Unavailable,
    }
}

fn snapshot_lookup(snapshot: &SnapshotIndex, dirs: &[String], name: &str) -> Option<String> {
    dirs.iter()
        .map(|dir| path::join(dir, name))
        .find(|p| snapshot.get(p).is_some_and(|e| !e.is_dir()))
}

/// Compatibility matrix for every audited tool.
pub fn audit_tools(
    settings: &AuditSettings,
    manifest: &ToolManifest,
    snapshot: &SnapshotIndex,
    probe: &ToolProbe,
) -> Vec<ToolRecord> {
    let mut names: Vec<String> = if manifest.is_empty() {
        settings.default_tools.clone()
    } else {
        manifest.names().map(String::from).collect()
    };
    for blocked in &settings.blocked_tools {
        if !names.contains(blocked) {
            names.push(blocked.clone());
        }
    }

    names
        .into_iter()
        .map(|name| {
            let mut build = manifest.get(&name).cloned().unwrap_or_default();
            if build.path.is_none() {
                build.path = snapshot_lookup(snapshot, &settings.build_search_paths, &name);
            }
            let located = probe.locate(&name);
            let runtime_version = match (&located, &build.version) {
                (Some(bin), Some(_)) => probe_version(bin),
                _ => None,
            };
            let runtime_path = located.map(|p| p.display().to_string());
            let blocked = settings.blocked_tools.contains(&name);
            let status = classify(
                Some(&build),
                runtime_path.as_deref(),
                runtime_version.as_deref(),
                blocked,
            );
            ToolRecord {
                name,
                build_path: build.path,
                build_version: build.version,
                runtime_path,
                runtime_version,
                status,
            }
        })
        .collect()
}

/// Path -> inode as recorded at build time.
pub fn load_inode_manifest(file: &Path) -> BTreeMap<String, u64> {
    fs::read_to_string(file)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> Option<u64> {
    None
}

pub fn audit_interpreters(candidates: &[PathBuf], build_inodes: &BTreeMap<String, u64>) -> Vec<InodeRecord> {
    candidates
        .iter()
        .map(|candidate| {
            let key = candidate.display().to_string();
            let runtime_inode = fs::metadata(candidate).ok().and_then(|m| inode_of(&m));
            let resolved = fs::canonicalize(candidate).ok().map(|p| p.display().to_string());
            let build_inode = build_inodes.get(&key).copied();
            let drift = matches!((runtime_inode, build_inode), (Some(r), Some(b)) if r != b);
            InodeRecord {
                path: key,
                runtime_inode,
                resolved,
                build_inode,
                drift,
            }
        })
        .collect()
}

/// Total bytes under `target`; 0 when it does not exist.
pub fn disk_usage(target: &Path) -> u64 {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(meta) if meta.is_dir() => WalkDir::new(target)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|ent| ent.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum(),
        _ => 0,
    }
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// `1536` -> `1.50 KB`, 1024-based.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} {}", UNITS[UNITS.len() - 1])
}

/// Parses a size with optional unit suffix (`250MB`, `1.5 G`, `512k`, `42`).
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;
    let exponent = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 1,
        "M" | "MB" | "MIB" => 2,
        "G" | "GB" | "GIB" => 3,
        "T" | "TB" | "TIB" => 4,
        _ => return None,
    };
    Some((number * 1024f64.powi(exponent)).round() as u64)
}

pub fn audit_storage(tracked: &[PathBuf], capacity_bytes: u64) -> Vec<StorageRecord> {
    tracked
        .iter()
        .map(|target| {
            let bytes = disk_usage(target);
            let percent = if capacity_bytes == 0 {
                0.0
            } else {
                (bytes as f64 / capacity_bytes as f64 * 10_000.0).round() / 100.0
            };
            StorageRecord {
                path: target.display().to_string(),
                bytes,
                human: human_size(bytes),
                percent_of_capacity: percent,
            }
        })
        .collect()
}

fn os_pretty_name() -> String {
    let Ok(text) = fs::read_to_string("/etc/os-release") else {
        return "Unknown OS".to_string();
    };
    text.lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .or_else(|| text.lines().next())
        .map(|l| l.replace('"', ""))
        .unwrap_or_else(|| "Unknown OS".to_string())
}

fn platform() -> String {
    let kernel = fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let base = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
    if kernel.is_empty() {
        base
    } else {
        format!("{base}-{kernel}")
    }
}

/// `--version` lines of the interpreter candidates that exist and answer.
fn language_runtimes(candidates: &[PathBuf]) -> BTreeMap<String, String> {
    candidates
        .iter()
        .filter(|c| c.is_file())
        .filter_map(|c| probe_version(c).map(|v| (c.display().to_string(), v)))
        .collect()
}

pub fn runtime_identity(
    service: &str,
    version: &str,
    build_info: &Path,
    probe: &ToolProbe,
    interpreters: &[PathBuf],
) -> RuntimeIdentity {
    RuntimeIdentity {
        service: service.to_string(),
        version: version.to_string(),
        os: os_pretty_name(),
        platform: platform(),
        build_info: fs::read_to_string(build_info)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        // glibc answers on stdout, musl on stderr with a non-zero exit.
        libc: probe.locate("ldd").and_then(|ldd| probe_version(&ldd)),
        language_runtimes: language_runtimes(interpreters),
    }
}

/// Runs one full audit pass.
pub fn run_audit(
    settings: &AuditSettings,
    snapshot: &SnapshotIndex,
    service: &str,
    version: &str,
) -> StatsReport {
    let capacity_bytes = parse_size(&settings.capacity).unwrap_or_else(|| {
        tracing::warn!(capacity = %settings.capacity, "unparseable capacity; storage percentages disabled");
        0
    });
    let manifest = ToolManifest::load(&settings.tool_manifest);
    let probe = ToolProbe::from_env(&settings.extra_search_paths);
    let build_inodes = load_inode_manifest(&settings.inode_manifest);

    StatsReport {
        runtime: runtime_identity(
            service,
            version,
            &settings.build_info,
            &probe,
            &settings.interpreter_candidates,
        ),
        tools: audit_tools(settings, &manifest, snapshot, &probe),
        interpreters: audit_interpreters(&settings.interpreter_candidates, &build_inodes),
        storage: audit_storage(&settings.tracked_paths, capacity_bytes),
        capacity_bytes,
        snapshot_entries: snapshot.len(),
    }
}
