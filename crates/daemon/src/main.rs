#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! envscope: environment introspection console.

use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use envscope_core::audit::ToolProbe;
use envscope_core::capture::{capture, capture_tool_manifest, write_snapshot};
use envscope_daemon::{app, build_state, Config};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "envscope", version, about = "Runtime vs build environment console")]
struct Args {
    /// Optional TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (env-filter syntax).
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve the HTTP API (default).
    Serve {
        /// Listen address; overrides the config file.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Capture the build snapshot and, optionally, the tool manifest.
    Capture {
        /// Snapshot output file.
        #[arg(long)]
        out: PathBuf,

        /// Tool manifest output file.
        #[arg(long)]
        tools_out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Cmd::Serve { listen: None }) {
        Cmd::Serve { listen } => serve(config, listen).await,
        Cmd::Capture { out, tools_out } => {
            tokio::task::spawn_blocking(move || run_capture(&config, &out, tools_out.as_deref()))
                .await?
        }
    }
}

async fn serve(config: Config, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let addr = listen.unwrap_or(config.server.listen);
    let state = build_state(config)?;
    let app = app(state);

    tracing::info!(listen = %addr, "envscope starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn run_capture(config: &Config, out: &std::path::Path, tools_out: Option<&std::path::Path>) -> anyhow::Result<()> {
    let entries = capture(&config.capture);
    let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    write_snapshot(&entries, BufWriter::new(file))?;
    tracing::info!(out = %out.display(), entries = entries.len(), "snapshot written");

    if let Some(tools_out) = tools_out {
        let probe = ToolProbe::from_env(&config.audit.extra_search_paths);
        let mut names = config.audit.default_tools.clone();
        for blocked in &config.audit.blocked_tools {
            if !names.contains(blocked) {
                names.push(blocked.clone());
            }
        }
        let manifest = capture_tool_manifest(&names, &probe);
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(tools_out, json).with_context(|| format!("writing {}", tools_out.display()))?;
        tracing::info!(out = %tools_out.display(), tools = manifest.len(), "tool manifest written");
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
