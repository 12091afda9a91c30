//! Handler for the text-to-image operation.
//!
//! `POST /api/v1/generate` with `{"input": "<prompt>"}` runs the full
//! pipeline against the text-to-image workflow template and answers
//! with the generated PNG bytes inline.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use motif_comfyui::pipeline::{PipelineError, SlotArtifact};
use motif_comfyui::workflow::Patch;
use motif_core::error::CoreError;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub input: Option<String>,
}

/// POST /api/v1/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> AppResult<Response> {
    let prompt = request
        .input
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AppError::Core(CoreError::Validation(
                "'input' must be a non-empty string".to_string(),
            ))
        })?;

    tracing::info!(prompt = %prompt, "Generation requested");

    let wiring = &state.config.engine.generate;

    let mut patches = vec![Patch::new(&wiring.prompt_node, "text", Value::from(prompt))];
    // A fresh seed per submission; a retried request must never reuse
    // the previous attempt's.
    if let Some(seed_node) = &wiring.seed_node {
        patches.push(Patch::random_seed(seed_node));
    }
    let patched = state
        .generate_workflow
        .patched(&patches)
        .map_err(PipelineError::from)?;

    let outputs = state
        .bridge
        .run_job(&patched, std::slice::from_ref(&wiring.output_node), prompt)
        .await?;

    match outputs.into_slot(&wiring.output_node) {
        Some(SlotArtifact::Ready { bytes, .. }) => {
            Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
        }
        Some(SlotArtifact::Failed { reason }) => Err(AppError::Generation(reason)),
        None => Err(AppError::Core(CoreError::Internal(
            "output slot missing from job result".to_string(),
        ))),
    }
}
