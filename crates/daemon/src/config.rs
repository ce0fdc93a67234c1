//! TOML configuration. Every field has a default, so the daemon runs
//! without a config file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use envscope_core::audit::AuditSettings;
use envscope_core::capture::CapturePolicy;
use envscope_core::DEFAULT_VIEW_LIMIT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub capture: CapturePolicy,
    pub audit: AuditSettings,
    pub exec: ExecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub service_name: String,
    pub view_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            service_name: "envscope".into(),
            view_limit_bytes: DEFAULT_VIEW_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base for every relative path in this file.
    pub workspace_root: PathBuf,
    pub snapshot: PathBuf,
    /// Where per-job cookie files are written.
    pub temp_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            snapshot: PathBuf::from("build_snapshot.txt"),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub shell: String,
    pub shell_timeout_secs: u64,
    pub job_program: String,
    pub job_base_args: Vec<String>,
    pub job_timeout_secs: u64,
    pub heartbeat_secs: u64,
    pub channel_capacity: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".into(),
            shell_timeout_secs: 60,
            job_program: "fly-job".into(),
            job_base_args: vec![],
            job_timeout_secs: 3600,
            heartbeat_secs: 5,
            channel_capacity: 256,
        }
    }
}

impl ExecConfig {
    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

fn make_abs(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

impl Config {
    /// Reads `file`, or returns the defaults when none is given.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let cfg = match file {
            Some(f) => {
                let text = std::fs::read_to_string(f)
                    .with_context(|| format!("reading config {}", f.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing config {}", f.display()))?
            }
            None => Self::default(),
        };
        Ok(cfg.resolved())
    }

    /// Anchors relative paths at `paths.workspace_root`.
    pub fn resolved(mut self) -> Self {
        let root = std::fs::canonicalize(&self.paths.workspace_root)
            .unwrap_or_else(|_| self.paths.workspace_root.clone());

        self.paths.snapshot = make_abs(&root, &self.paths.snapshot);
        self.paths.temp_dir = self.paths.temp_dir.as_deref().map(|t| make_abs(&root, t));

        let audit = &mut self.audit;
        audit.tool_manifest = make_abs(&root, &audit.tool_manifest);
        audit.inode_manifest = make_abs(&root, &audit.inode_manifest);
        audit.build_info = make_abs(&root, &audit.build_info);
        for p in audit.extra_search_paths.iter_mut().chain(audit.tracked_paths.iter_mut()) {
            *p = make_abs(&root, p);
        }
        if audit.tracked_paths.is_empty() {
            audit.tracked_paths.push(root.clone());
        }
        if self.capture.full_roots.is_empty() {
            self.capture.full_roots.push(root.clone());
        }

        self.paths.workspace_root = root;
        self
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.paths.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"

            [exec]
            job_program = "/opt/bin/job"

            [audit]
            blocked_tools = ["gcc"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.listen.port(), 9000);
        assert_eq!(cfg.server.view_limit_bytes, DEFAULT_VIEW_LIMIT);
        assert_eq!(cfg.exec.job_program, "/opt/bin/job");
        assert_eq!(cfg.exec.heartbeat_secs, 5);
        assert_eq!(cfg.audit.blocked_tools, vec!["gcc".to_string()]);
        assert_eq!(cfg.audit.capacity, "250MB");
    }

    #[test]
    fn relative_paths_anchor_at_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.paths.workspace_root = dir.path().to_path_buf();
        let cfg = cfg.resolved();

        let root = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(cfg.paths.snapshot, root.join("build_snapshot.txt"));
        assert_eq!(cfg.audit.tool_manifest, root.join("build_tools.json"));
        assert_eq!(cfg.audit.tracked_paths, vec![root.clone()]);
        assert_eq!(cfg.capture.full_roots, vec![root]);
    }
}
