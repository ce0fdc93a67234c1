//! Parameterised job requests and the line protocol streamed back to clients.
//!
//! The job program itself (download, packaging, upload) is external; this
//! module only validates the request, plans the command line and frames
//! output chunks.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConsoleError, Result};
use crate::now_ms;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Human-readable status lines plus structured events.
    #[default]
    Debug,
    /// Structured JSON events only.
    Data,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Assemblyai,
    Deepgram,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Assemblyai => "assemblyai",
            Provider::Deepgram => "deepgram",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    /// Target resource locator. Required.
    pub url: String,
    pub cookies: Option<String>,
    pub chunk_size: Option<String>,
    pub limit_rate: Option<String>,
    pub player_clients: Option<String>,
    pub wait_time: Option<String>,
    pub po_token: Option<String>,
    pub impersonate: Option<String>,
    pub provider: Provider,
    pub mode: OutputMode,
    pub deepgram_key: Option<String>,
    pub assemblyai_key: Option<String>,
    pub list_formats: bool,
    pub no_playlist: bool,
    /// Seconds; enables balanced splitting when positive.
    pub total_duration: f64,
    /// Minutes per part.
    pub split_duration: u32,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            cookies: None,
            chunk_size: None,
            limit_rate: None,
            player_clients: None,
            wait_time: None,
            po_token: None,
            impersonate: None,
            provider: Provider::default(),
            mode: OutputMode::default(),
            deepgram_key: None,
            assemblyai_key: None,
            list_formats: false,
            no_playlist: false,
            total_duration: 0.0,
            split_duration: 30,
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl JobRequest {
    /// Fails fast when the target is absent.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ConsoleError::MissingParameter("url"));
        }
        Ok(())
    }

    /// Cookie text with literal `\n` / `\t` escapes expanded, if any was sent.
    pub fn cookie_text(&self) -> Option<String> {
        non_empty(&self.cookies).map(|c| c.replace("\\n", "\n").replace("\\t", "\t"))
    }

    fn extractor_args(&self) -> Option<String> {
        let mut clients: Vec<&str> = non_empty(&self.player_clients)
            .map(|s| s.split(',').map(str::trim).filter(|c| !c.is_empty()).collect())
            .unwrap_or_default();
        if !clients.contains(&"web") {
            clients.push("web");
        }

        let mut params = vec![format!("player_client={}", clients.join(","))];
        if !self.list_formats {
            if let Some(wait) = non_empty(&self.wait_time) {
                params.push(format!("playback_wait={wait}"));
            }
        }
        if let Some(token) = non_empty(&self.po_token) {
            params.push(format!("po_token={token}"));
        }
        Some(format!("youtube:{}", params.join(";")))
    }

    /// Even split of `total_duration` into parts no longer than `split_duration`.
    pub fn split_plan(&self) -> SplitPlan {
        let base = f64::from(self.split_duration.max(1)) * 60.0;
        if self.total_duration > 0.0 {
            let parts = (self.total_duration / base).ceil().max(1.0);
            SplitPlan {
                parts: Some(parts as u32),
                target_seconds: self.total_duration / parts,
            }
        } else {
            SplitPlan {
                parts: None,
                target_seconds: base,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitPlan {
    pub parts: Option<u32>,
    pub target_seconds: f64,
}

/// Fully resolved command line for one job run.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Status lines announced before the process starts.
    pub notes: Vec<String>,
}

impl JobPlan {
    pub fn build(
        req: &JobRequest,
        program: &str,
        base_args: &[String],
        cookie_file: Option<&PathBuf>,
    ) -> Result<Self> {
        req.validate()?;

        let mut args: Vec<String> = base_args.to_vec();
        let mut notes = Vec::new();
        args.push("--newline".into());

        if req.list_formats {
            args.push("--list-formats".into());
            notes.push("listing formats".to_string());
        } else {
            args.push("--http-chunk-size".into());
            args.push(non_empty(&req.chunk_size).unwrap_or("10M").to_string());
            args.push("--limit-rate".into());
            args.push(non_empty(&req.limit_rate).unwrap_or("4M").to_string());

            let split = req.split_plan();
            args.push("--split-seconds".into());
            args.push(format!("{:.1}", split.target_seconds));
            if let Some(parts) = split.parts {
                args.push("--total-duration".into());
                args.push(format!("{:.1}", req.total_duration));
                notes.push(format!(
                    "balanced split: {parts} parts @ ~{:.1}m each (total {:.1}m)",
                    split.target_seconds / 60.0,
                    req.total_duration / 60.0
                ));
            }
        }

        if req.no_playlist {
            args.push("--no-playlist".into());
        }
        if let Some(file) = cookie_file {
            args.push("--cookies".into());
            args.push(file.display().to_string());
        }
        if let Some(extractor) = req.extractor_args() {
            args.push("--extractor-args".into());
            args.push(extractor);
        }
        if let Some(imp) = non_empty(&req.impersonate) {
            args.push("--impersonate".into());
            args.push(imp.to_string());
        }
        args.push(req.url.trim().to_string());

        let mut env = vec![("JOB_PROVIDER".to_string(), req.provider.as_str().to_string())];
        if let Some(k) = non_empty(&req.deepgram_key) {
            env.push(("DEEPGRAM_KEY".into(), k.to_string()));
        }
        if let Some(k) = non_empty(&req.assemblyai_key) {
            env.push(("ASSEMBLYAI_KEY".into(), k.to_string()));
        }

        Ok(Self {
            program: program.to_string(),
            args,
            env,
            notes,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Error,
    Keepalive,
    Done,
}

impl EventKind {
    fn label(self) -> &'static str {
        match self {
            EventKind::Status => "STATUS",
            EventKind::Error => "ERROR",
            EventKind::Keepalive => "KEEPALIVE",
            EventKind::Done => "DONE",
        }
    }

    fn structured(self) -> bool {
        !matches!(self, EventKind::Status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: i64,
    pub payload: Map<String, Value>,
}

/// Frames one event as zero or more output chunks for `mode`.
pub fn render_event(
    mode: OutputMode,
    kind: EventKind,
    text: Option<&str>,
    mut payload: Map<String, Value>,
) -> Vec<String> {
    let mut chunks = Vec::new();
    if let Some(t) = text {
        if !payload.contains_key("message") {
            payload.insert("message".into(), Value::String(t.to_string()));
        }
    }
    if mode == OutputMode::Debug {
        if let Some(t) = text {
            chunks.push(format!("[{}] {t}\n", kind.label()));
        }
    }
    let has_extra = payload.keys().any(|k| k != "message");
    if kind.structured() || (mode == OutputMode::Debug && has_extra) {
        let event = JobEvent {
            kind,
            timestamp: now_ms(),
            payload,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            chunks.push(format!("{json}\n"));
        }
    }
    chunks
}

/// Terminal marker payload.
pub fn final_payload(exit_code: Option<i32>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("final".into(), Value::Bool(true));
    if let Some(code) = exit_code {
        payload.insert("exit_code".into(), Value::from(code));
    }
    payload
}

/// Classifies raw subprocess output lines; throttles progress chatter.
#[derive(Debug)]
pub struct LineFilter {
    mode: OutputMode,
    progress_interval: Duration,
    last_progress: Option<Instant>,
}

/// What to do with one raw output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    Drop,
    /// Forward verbatim (structured output from the job program).
    Raw(String),
    Event(EventKind, String),
}

impl LineFilter {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            progress_interval: Duration::from_secs(1),
            last_progress: None,
        }
    }

    pub fn classify(&mut self, line: &str, now: Instant) -> LineAction {
        let text = line.trim();
        if text.is_empty() {
            return LineAction::Drop;
        }

        if self.mode == OutputMode::Data {
            return match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(_)) => LineAction::Raw(format!("{text}\n")),
                _ => LineAction::Drop,
            };
        }

        if text.contains("[download]") {
            let due = self
                .last_progress
                .map_or(true, |last| now.duration_since(last) > self.progress_interval);
            if !due {
                return LineAction::Drop;
            }
            self.last_progress = Some(now);
            let cleaned = text.replace("[download]", "progress:");
            return LineAction::Event(EventKind::Status, cleaned.trim().to_string());
        }

        if text.to_lowercase().contains("error") {
            LineAction::Event(EventKind::Error, text.to_string())
        } else {
            LineAction::Event(EventKind::Status, text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_target_fails_validation() {
        let req = JobRequest {
            url: "   ".into(),
            ..Default::default()
        };
        let err = JobPlan::build(&req, "fly-job", &[], None).unwrap_err();
        assert_eq!(err.kind(), "missing_parameter");
    }

    #[test]
    fn plan_carries_options_and_target_last() {
        let req = JobRequest {
            url: "https://example.com/watch?v=1".into(),
            player_clients: Some("tv, ios".into()),
            wait_time: Some("2".into()),
            po_token: Some("tok".into()),
            no_playlist: true,
            deepgram_key: Some("dg".into()),
            provider: Provider::Deepgram,
            ..Default::default()
        };
        let cookie = PathBuf::from("/tmp/cookies_x.txt");
        let plan = JobPlan::build(&req, "fly-job", &["--base".into()], Some(&cookie)).unwrap();

        assert_eq!(plan.args.first().unwrap(), "--base");
        assert_eq!(plan.args.last().unwrap(), "https://example.com/watch?v=1");
        assert!(plan.args.windows(2).any(|w| w[0] == "--http-chunk-size" && w[1] == "10M"));
        assert!(plan.args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/tmp/cookies_x.txt"));
        assert!(plan.args.contains(&"youtube:player_client=tv,ios,web;playback_wait=2;po_token=tok".to_string()));
        assert!(plan.args.contains(&"--no-playlist".to_string()));
        assert!(plan.env.contains(&("JOB_PROVIDER".into(), "deepgram".into())));
        assert!(plan.env.contains(&("DEEPGRAM_KEY".into(), "dg".into())));
    }

    #[test]
    fn balanced_split() {
        let req = JobRequest {
            url: "u".into(),
            total_duration: 5400.0,
            split_duration: 40,
            ..Default::default()
        };
        let split = req.split_plan();
        assert_eq!(split.parts, Some(3));
        assert_eq!(split.target_seconds, 1800.0);

        let plan = JobPlan::build(&req, "p", &[], None).unwrap();
        assert_eq!(plan.notes.len(), 1);
    }

    #[test]
    fn cookies_unescaped() {
        let req = JobRequest {
            cookies: Some("a\\tb\\nc".into()),
            ..Default::default()
        };
        assert_eq!(req.cookie_text().unwrap(), "a\tb\nc");
    }

    #[test]
    fn data_mode_emits_only_structured_events() {
        assert!(render_event(OutputMode::Data, EventKind::Status, Some("hi"), Map::new()).is_empty());
        let chunks = render_event(OutputMode::Data, EventKind::Done, Some("ok"), final_payload(Some(0)));
        assert_eq!(chunks.len(), 1);
        let ev: JobEvent = serde_json::from_str(chunks[0].trim()).unwrap();
        assert_eq!(ev.kind, EventKind::Done);
        assert_eq!(ev.payload["final"], Value::Bool(true));
    }

    #[test]
    fn debug_mode_emits_text_then_json() {
        let chunks = render_event(OutputMode::Debug, EventKind::Error, Some("boom"), Map::new());
        assert_eq!(chunks[0], "[ERROR] boom\n");
        assert!(chunks[1].starts_with('{'));
        let status = render_event(OutputMode::Debug, EventKind::Status, Some("hi"), Map::new());
        assert_eq!(status, vec!["[STATUS] hi\n".to_string()]);
    }

    #[test]
    fn progress_lines_are_throttled() {
        let mut f = LineFilter::new(OutputMode::Debug);
        let t0 = Instant::now();
        assert!(matches!(f.classify("[download] 1%", t0), LineAction::Event(EventKind::Status, _)));
        assert_eq!(f.classify("[download] 2%", t0 + Duration::from_millis(200)), LineAction::Drop);
        assert!(matches!(
            f.classify("[download] 9%", t0 + Duration::from_millis(1500)),
            LineAction::Event(..)
        ));
        assert!(matches!(f.classify("ERROR: nope", t0), LineAction::Event(EventKind::Error, _)));
        assert_eq!(f.classify("   ", t0), LineAction::Drop);
    }

    #[test]
    fn data_mode_forwards_json_lines_only() {
        let mut f = LineFilter::new(OutputMode::Data);
        let now = Instant::now();
        assert_eq!(f.classify("plain text", now), LineAction::Drop);
        assert_eq!(
            f.classify(r#"{"type":"asset"}"#, now),
            LineAction::Raw("{\"type\":\"asset\"}\n".into())
        );
    }
}
