//! Handler for the background-removal operation.
//!
//! `POST /api/v1/remove-background` takes a multipart `image` part,
//! stages it in the engine's input store, and runs the removal
//! workflow. The template produces one cutout per removal model, so
//! the response is a per-slot map: each entry is either the image
//! (base64) or the reason that slot failed. The request as a whole
//! fails only when no slot produced anything.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use motif_comfyui::pipeline::{PipelineError, SlotArtifact};
use motif_comfyui::workflow::Patch;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/v1/remove-background
pub async fn remove_background(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let (filename, bytes) = read_image_part(&mut multipart).await?;
    tracing::info!(filename = %filename, size = bytes.len(), "Background removal requested");

    // Unique staged name so concurrent requests never clobber each
    // other in the engine's input store.
    let staged_name = format!("upload_rmbg_{}.png", uuid::Uuid::new_v4());
    let uploaded = state.bridge.upload_image(bytes, &staged_name).await?;

    let wiring = &state.config.engine.remove_background;
    let patched = state
        .remove_background_workflow
        .patched(&[Patch::new(
            &wiring.input_node,
            "image",
            Value::from(uploaded.name),
        )])
        .map_err(PipelineError::from)?;

    let outputs = state
        .bridge
        .run_job(&patched, &wiring.output_nodes, "rmbg")
        .await?;

    let any_succeeded = outputs.any_succeeded();
    let mut results = serde_json::Map::new();
    for (slot, artifact) in outputs.slots {
        let entry = match artifact {
            SlotArtifact::Ready { reference, bytes } => json!({
                "filename": reference.filename,
                "subfolder": reference.subfolder,
                "type": reference.kind,
                "image_data_base64": STANDARD.encode(&bytes),
            }),
            SlotArtifact::Failed { reason } => json!({ "error": reason }),
        };
        results.insert(format!("node_{slot}"), entry);
    }

    if !any_succeeded {
        return Ok((
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Failed to retrieve any output images",
                "code": "ALL_OUTPUTS_FAILED",
                "details": Value::Object(results),
            })),
        )
            .into_response());
    }

    Ok(Json(Value::Object(results)).into_response())
}

/// Pull the `image` part out of the multipart body.
async fn read_image_part(multipart: &mut Multipart) -> AppResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(AppError::BadRequest("No selected file".to_string()));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Could not read uploaded image: {e}")))?;
        if bytes.is_empty() {
            return Err(AppError::BadRequest("Uploaded image is empty".to_string()));
        }

        return Ok((filename, bytes.to_vec()));
    }

    Err(AppError::BadRequest(
        "Missing 'image' file part in the request".to_string(),
    ))
}
