use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use decode_bus::PipelineError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::session::{Session, SessionStatus};

type ApiResult<T> = Result<T, ApiError>;

struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<PipelineError>() {
            Some(PipelineError::AlreadyStarted) => StatusCode::CONFLICT,
            Some(PipelineError::Disposed) => StatusCode::GONE,
            Some(PipelineError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log::warn!("api error: {:#}", self.0);
        (status, format!("{:#}", self.0)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub(crate) fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/seek/{ms}", post(seek))
        .with_state(session)
}

pub(crate) fn start_api_server(addr: String, session: Arc<Session>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = router(session);

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API server bind {} failed: {}", addr, e);
                return;
            }
        };
        log::info!("API server listening on {}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

async fn index() -> &'static str {
    "decode-pipe"
}

async fn status(State(session): State<Arc<Session>>) -> Json<SessionStatus> {
    Json(session.status())
}

async fn start(State(session): State<Arc<Session>>) -> ApiResult<Json<SessionStatus>> {
    session.start()?;
    Ok(Json(session.status()))
}

async fn stop(State(session): State<Arc<Session>>) -> Json<SessionStatus> {
    session.stop().await;
    Json(session.status())
}

async fn seek(
    State(session): State<Arc<Session>>,
    Path(ms): Path<i64>,
) -> ApiResult<Json<SessionStatus>> {
    session.seek(ms)?;
    Ok(Json(session.status()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_errors_map_to_status_codes() {
        let conflict = ApiError::from(PipelineError::AlreadyStarted).into_response();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let gone = ApiError::from(PipelineError::Disposed).into_response();
        assert_eq!(gone.status(), StatusCode::GONE);

        let other = ApiError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
