use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use envscope_core::api::{
    DeleteRequest, DeleteResponse, ErrorBody, ListResponse, PathQuery, ShellRequest, ShellResponse,
};
use envscope_core::audit::run_audit;
use envscope_core::job::JobRequest;
use envscope_core::model::{StatsReport, TextView};
use envscope_core::{path, ConsoleError, Explorer};
use tokio_util::io::ReaderStream;

use crate::config::Config;
use crate::relay;

#[derive(Clone)]
pub struct AppState {
    pub explorer: Explorer,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(explorer: Explorer, config: Config) -> Self {
        Self {
            explorer,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/list", get(list))
        .route("/api/view", get(view))
        .route("/api/download", get(download))
        .route("/api/delete", post(delete))
        .route("/api/stats", get(stats))
        .route("/api/shell", post(shell))
        .route("/api/job", post(job))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Runs blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> envscope_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(AppError::from)
}

async fn list(
    State(st): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let explorer = st.explorer.clone();
    let (raw, source) = (q.path.clone(), q.source);
    let items = blocking(move || explorer.list(&raw, source)).await?;
    Ok(Json(ListResponse {
        path: path::normalize(&q.path)?,
        source: q.source,
        items,
    }))
}

async fn view(
    State(st): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Result<Json<TextView>, AppError> {
    let explorer = st.explorer.clone();
    let view = blocking(move || explorer.view(&q.path, q.source)).await?;
    Ok(Json(view))
}

async fn download(
    State(st): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Result<Response, AppError> {
    let explorer = st.explorer.clone();
    let target = blocking(move || explorer.download(&q.path, q.source)).await?;

    let file = tokio::fs::File::open(&target.file)
        .await
        .map_err(|e| ConsoleError::from_io(e, &target.file.display().to_string()))?;
    // No Content-Length: pseudo-files report a size that does not match their content.
    tracing::info!(file = %target.file.display(), size = target.size, "download started");

    let disposition = format!(
        "attachment; filename=\"{}\"",
        target.file_name.replace('\\', "\\\\").replace('"', "\\\"")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download\""));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn delete(
    State(st): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let explorer = st.explorer.clone();
    let raw = req.path.clone();
    blocking(move || explorer.delete(&raw, req.source)).await?;
    Ok(Json(DeleteResponse {
        ok: true,
        path: path::normalize(&req.path)?,
    }))
}

async fn stats(State(st): State<AppState>) -> Result<Json<StatsReport>, AppError> {
    let report = tokio::task::spawn_blocking(move || {
        run_audit(
            &st.config.audit,
            st.explorer.snapshot(),
            &st.config.server.service_name,
            env!("CARGO_PKG_VERSION"),
        )
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(Json(report))
}

async fn shell(
    State(st): State<AppState>,
    Json(req): Json<ShellRequest>,
) -> Result<Json<ShellResponse>, AppError> {
    let res = relay::run_shell(&st.config.exec, &req.command).await?;
    Ok(Json(res))
}

async fn job(State(st): State<AppState>, Json(req): Json<JobRequest>) -> Response {
    tracing::info!(url = %req.url, mode = ?req.mode, "job requested");
    let rx = relay::start_job(st.config.exec.clone(), st.config.temp_dir(), req);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[derive(Debug)]
pub enum AppError {
    Console(ConsoleError),
    Internal(anyhow::Error),
}

impl From<ConsoleError> for AppError {
    fn from(value: ConsoleError) -> Self {
        Self::Console(value)
    }
}

fn status_of(err: &ConsoleError) -> StatusCode {
    match err {
        ConsoleError::NotFound(_) | ConsoleError::NotInSnapshot(_) => StatusCode::NOT_FOUND,
        ConsoleError::NotADirectory(_)
        | ConsoleError::InvalidPath { .. }
        | ConsoleError::MissingParameter(_) => StatusCode::BAD_REQUEST,
        ConsoleError::IsADirectory(_) => StatusCode::CONFLICT,
        ConsoleError::PermissionDenied(_) | ConsoleError::PolicyViolation { .. } => {
            StatusCode::FORBIDDEN
        }
        ConsoleError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ConsoleError::SpawnFailure { .. }
        | ConsoleError::ProcessExitNonZero(_)
        | ConsoleError::MalformedSnapshot { .. }
        | ConsoleError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, body) = match self {
            AppError::Console(e) => {
                let code = status_of(&e);
                if code.is_server_error() {
                    tracing::error!(error = %e, kind = e.kind(), "request failed");
                } else {
                    tracing::debug!(error = %e, kind = e.kind(), "request rejected");
                }
                (
                    code,
                    ErrorBody {
                        error: e.to_string(),
                        kind: e.kind().to_string(),
                    },
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: e.to_string(),
                        kind: "internal".to_string(),
                    },
                )
            }
        };
        (code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envscope_core::error::Operation;
    use envscope_core::Source;

    #[test]
    fn status_mapping() {
        assert_eq!(status_of(&ConsoleError::NotInSnapshot("/x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(&ConsoleError::IsADirectory("/x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(&ConsoleError::PolicyViolation {
                op: Operation::Delete,
                against: Source::Build
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(&ConsoleError::InvalidPath {
                path: "rel".into(),
                reason: "must be absolute"
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(&ConsoleError::Decode("/x".into())), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
