//! Subprocess execution: one-shot shell commands and streamed jobs.
//!
//! A job runs in its own process group. Output is pumped line by line into a
//! bounded channel that backs the HTTP response body; when the receiver goes
//! away, or the job outlives its timeout, the whole group is killed and
//! reaped.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use envscope_core::api::ShellResponse;
use envscope_core::job::{
    final_payload, render_event, EventKind, JobPlan, JobRequest, LineAction, LineFilter,
    OutputMode,
};
use envscope_core::{new_ulid, ConsoleError};
use serde_json::Map;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};

use crate::config::ExecConfig;

/// Upper bound on delivering the terminal marker to a client that stopped reading.
const MARKER_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `command` through the configured shell and captures its output.
pub async fn run_shell(exec: &ExecConfig, command: &str) -> Result<ShellResponse, ConsoleError> {
    let child = Command::new(&exec.shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ConsoleError::SpawnFailure {
            program: exec.shell.clone(),
            message: e.to_string(),
        })?;
    let pid = child.id();

    let out = match tokio::time::timeout(exec.shell_timeout(), child.wait_with_output()).await {
        Ok(res) => res.map_err(|e| ConsoleError::Io {
            path: exec.shell.clone(),
            source: e,
        })?,
        Err(_) => {
            tracing::warn!(%command, timeout_secs = exec.shell_timeout_secs, "shell command timed out");
            kill_group(pid);
            return Ok(ShellResponse {
                command: command.to_string(),
                exit_code: None,
                output: String::new(),
                error: Some(format!("command timed out after {}s", exec.shell_timeout_secs)),
            });
        }
    };

    let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&out.stderr));

    let exit_code = out.status.code();
    let error = match exit_code {
        Some(0) => None,
        Some(code) => Some(ConsoleError::ProcessExitNonZero(code).to_string()),
        None => Some("process terminated by signal".to_string()),
    };
    tracing::info!(%command, ?exit_code, bytes = output.len(), "shell command finished");

    Ok(ShellResponse {
        command: command.to_string(),
        exit_code,
        output,
        error,
    })
}

/// Starts a job in the background; chunks arrive on the returned receiver,
/// ending with exactly one terminal marker unless the receiver is dropped.
pub fn start_job(exec: ExecConfig, temp_dir: PathBuf, req: JobRequest) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(exec.channel_capacity.max(1));
    tokio::spawn(async move {
        let mut session = Session {
            mode: req.mode,
            deadline: Box::pin(tokio::time::sleep(exec.job_timeout())),
            tx,
        };
        let outcome = drive(&exec, &temp_dir, &req, &mut session).await;
        session.finish(outcome, exec.job_timeout_secs).await;
    });
    rx
}

#[derive(Debug)]
enum Outcome {
    Exited(Option<i32>),
    Failed(String),
    TimedOut,
    Disconnected,
}

#[derive(Debug)]
enum Stop {
    Disconnected,
    TimedOut,
}

impl From<Stop> for Outcome {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::Disconnected => Outcome::Disconnected,
            Stop::TimedOut => Outcome::TimedOut,
        }
    }
}

struct Session {
    mode: OutputMode,
    deadline: Pin<Box<Sleep>>,
    tx: mpsc::Sender<String>,
}

impl Session {
    async fn send(&mut self, chunk: String) -> Result<(), Stop> {
        tokio::select! {
            res = self.tx.send(chunk) => res.map_err(|_| Stop::Disconnected),
            _ = &mut self.deadline => Err(Stop::TimedOut),
        }
    }

    async fn emit(&mut self, kind: EventKind, text: Option<&str>) -> Result<(), Stop> {
        for chunk in render_event(self.mode, kind, text, Map::new()) {
            self.send(chunk).await?;
        }
        Ok(())
    }

    async fn finish(mut self, outcome: Outcome, timeout_secs: u64) {
        let (kind, text, code) = match outcome {
            Outcome::Disconnected => {
                tracing::info!("client disconnected; job discarded");
                return;
            }
            Outcome::Exited(Some(0)) => (EventKind::Done, "job completed".to_string(), Some(0)),
            Outcome::Exited(Some(code)) => (
                EventKind::Error,
                ConsoleError::ProcessExitNonZero(code).to_string(),
                Some(code),
            ),
            Outcome::Exited(None) => (EventKind::Error, "process terminated by signal".to_string(), None),
            Outcome::TimedOut => (EventKind::Error, format!("job timed out after {timeout_secs}s"), None),
            Outcome::Failed(message) => (EventKind::Error, message, None),
        };
        tracing::info!(?kind, %text, "job finished");

        // The marker is delivered even once the deadline has passed, but a
        // reader that never drains the channel does not hold the task.
        for chunk in render_event(self.mode, kind, Some(&text), final_payload(code)) {
            match tokio::time::timeout(MARKER_SEND_TIMEOUT, self.tx.send(chunk)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    tracing::warn!("client stopped reading; terminal marker dropped");
                    break;
                }
            }
        }
    }
}

/// Removes the cookie file when the job ends, however it ends.
struct CookieFile(PathBuf);

impl Drop for CookieFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::debug!(path = %self.0.display(), error = %e, "cookie file cleanup");
        }
    }
}

async fn drive(exec: &ExecConfig, temp_dir: &Path, req: &JobRequest, session: &mut Session) -> Outcome {
    if let Err(e) = req.validate() {
        return Outcome::Failed(e.to_string());
    }

    let cookie_file = match req.cookie_text() {
        Some(text) => {
            let path = temp_dir.join(format!("cookies_{}.txt", new_ulid()));
            if let Err(e) = tokio::fs::write(&path, text).await {
                return Outcome::Failed(format!("failed to write cookie file: {e}"));
            }
            Some(CookieFile(path))
        }
        None => None,
    };

    let plan = match JobPlan::build(
        req,
        &exec.job_program,
        &exec.job_base_args,
        cookie_file.as_ref().map(|c| &c.0),
    ) {
        Ok(p) => p,
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    for note in &plan.notes {
        if let Err(stop) = session.emit(EventKind::Status, Some(note)).await {
            return stop.into();
        }
    }

    let mut child = match Command::new(&plan.program)
        .args(&plan.args)
        .envs(plan.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            let err = ConsoleError::SpawnFailure {
                program: plan.program.clone(),
                message: e.to_string(),
            };
            tracing::warn!(error = %err, "job spawn failed");
            return Outcome::Failed(err.to_string());
        }
    };

    let pid = child.id();
    tracing::info!(program = %plan.program, ?pid, "job started");

    let (line_tx, mut lines) = mpsc::channel::<String>(64);
    if let Some(out) = child.stdout.take() {
        tokio::spawn(pump(out, line_tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        tokio::spawn(pump(err, line_tx.clone()));
    }
    drop(line_tx);

    if let Some(pid) = pid {
        if let Err(stop) = session.emit(EventKind::Status, Some(&format!("spawned pid {pid}"))).await {
            return terminate(&mut child, stop.into()).await;
        }
    }

    stream_output(&mut child, &mut lines, session, exec.heartbeat()).await
}

async fn stream_output(
    child: &mut Child,
    lines: &mut mpsc::Receiver<String>,
    session: &mut Session,
    heartbeat: Duration,
) -> Outcome {
    let pid = child.id();
    let mut filter = LineFilter::new(session.mode);
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        let step = tokio::select! {
            _ = session.tx.closed() => Err(Stop::Disconnected),
            _ = &mut session.deadline => Err(Stop::TimedOut),
            _ = ticker.tick() => session.emit(EventKind::Keepalive, None).await,
            line = lines.recv() => match line {
                Some(line) => match filter.classify(&line, std::time::Instant::now()) {
                    LineAction::Drop => Ok(()),
                    LineAction::Raw(chunk) => session.send(chunk).await,
                    LineAction::Event(kind, text) => session.emit(kind, Some(&text)).await,
                },
                None => break,
            },
        };
        if let Err(stop) = step {
            return terminate(child, stop.into()).await;
        }
    }

    // Both pipes are closed; the process is exiting or has exited.
    let waited = tokio::select! {
        status = child.wait() => Ok(status),
        _ = session.tx.closed() => Err(Stop::Disconnected),
        _ = &mut session.deadline => Err(Stop::TimedOut),
    };
    match waited {
        Ok(Ok(status)) => {
            // Leftover descendants die with the leader.
            kill_group(pid);
            Outcome::Exited(status.code())
        }
        Ok(Err(e)) => Outcome::Failed(format!("failed to wait for job: {e}")),
        Err(stop) => terminate(child, stop.into()).await,
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "job output read failed");
                break;
            }
        }
    }
}

async fn terminate(child: &mut Child, outcome: Outcome) -> Outcome {
    tracing::warn!(?outcome, pid = ?child.id(), "killing job process group");
    kill_group(child.id());
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "child already exited");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "failed to reap job");
    }
    outcome
}

/// Kills every process in the job's group, including detached descendants.
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Ok(pgid) = i32::try_from(pid) {
            // SAFETY: kill(2) takes plain integers; a negative pid addresses
            // the process group created for the child by `process_group(0)`.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(pgid, "process group already gone");
            }
        }
    }
}
