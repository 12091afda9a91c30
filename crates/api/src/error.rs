use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use motif_comfyui::api::SubmitError;
use motif_comfyui::pipeline::PipelineError;
use motif_comfyui::tracker::TrackError;
use motif_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain and pipeline errors and implements [`IntoResponse`] to
/// produce consistent JSON error responses. Engine-side failures map
/// to 502: the bridge is fine, the thing behind it is not.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `motif_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A structural failure from the engine pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The engine accepted the job but produced no retrievable output
    /// (single-output operations only).
    #[error("Generation failed: {0}")]
    Generation(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Pipeline(pipeline) => classify_pipeline_error(pipeline),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Generation(msg) => {
                (StatusCode::BAD_GATEWAY, "GENERATION_FAILED", msg.clone())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a pipeline error into an HTTP status, error code, and message.
///
/// - Template errors are deployment misconfiguration: 500.
/// - Everything the engine did or failed to do: 502.
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    match err {
        PipelineError::Template(e) => {
            tracing::error!(error = %e, "Workflow template error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "WORKFLOW_ERROR",
                e.to_string(),
            )
        }
        PipelineError::Submit(SubmitError::EngineUnreachable(e)) => (
            StatusCode::BAD_GATEWAY,
            "ENGINE_UNREACHABLE",
            format!("ComfyUI unreachable: {e}"),
        ),
        PipelineError::Submit(SubmitError::EngineRejected { status, .. }) => (
            StatusCode::BAD_GATEWAY,
            "ENGINE_REJECTED",
            format!("ComfyUI rejected the workflow (status {status})"),
        ),
        PipelineError::Track(TrackError::ConnectionFailed(e)) => (
            StatusCode::BAD_GATEWAY,
            "EVENT_STREAM_FAILED",
            format!("Could not open the ComfyUI event stream: {e}"),
        ),
        PipelineError::Track(TrackError::HistoryUnreachable(e)) => (
            StatusCode::BAD_GATEWAY,
            "HISTORY_UNREACHABLE",
            format!("ComfyUI history endpoint unreachable: {e}"),
        ),
        PipelineError::Track(TrackError::InvalidPollInterval) => {
            tracing::error!("Poll interval misconfigured");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                "Poll interval must be greater than zero".to_string(),
            )
        }
        PipelineError::Upload(e) => (
            StatusCode::BAD_GATEWAY,
            "UPLOAD_FAILED",
            format!("Failed to stage image with ComfyUI: {e}"),
        ),
    }
}
