#![warn(missing_docs)]

//! envscope daemon: HTTP surface, subprocess relay and configuration.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use envscope_core::{Explorer, SnapshotIndex};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod http;
pub mod relay;

pub use config::Config;
pub use http::AppState;

/// Loads the snapshot named by `config` and assembles shared state.
///
/// A missing snapshot yields an empty index; a malformed one is fatal.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let snapshot = SnapshotIndex::load(&config.paths.snapshot)
        .with_context(|| format!("loading snapshot {}", config.paths.snapshot.display()))?;
    let explorer = Explorer::new(Arc::new(snapshot), config.server.view_limit_bytes);
    Ok(AppState::new(explorer, config))
}

/// Full application router with request tracing.
pub fn app(state: AppState) -> Router {
    http::router(state).layer(TraceLayer::new_for_http())
}
