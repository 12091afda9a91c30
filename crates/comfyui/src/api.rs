//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history retrieval,
//! image download and upload) using [`reqwest`]. Each operation gets
//! its own error type because callers treat their failures very
//! differently: a submission failure aborts the request, a history
//! failure aborts polling, a fetch failure stays per-slot.

use std::collections::HashMap;

use serde::Deserialize;

use crate::outputs::{ImageRef, NodeOutput};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct Queued {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Response returned by `POST /upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadedImage {
    /// Filename the engine stored the upload under (what a LoadImage
    /// node expects in its `image` input).
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default = "default_upload_kind", rename = "type")]
    pub kind: String,
}

fn default_upload_kind() -> String {
    "input".to_string()
}

/// One prompt's record in the history endpoint's response.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node id.
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
}

/// Response of `GET /history/{prompt_id}`: a map keyed by prompt id.
/// The queried prompt is absent until the engine has started recording
/// it.
#[derive(Debug, Default, Deserialize)]
pub struct History(HashMap<String, HistoryEntry>);

impl History {
    pub fn entry(&self, prompt_id: &str) -> Option<&HistoryEntry> {
        self.0.get(prompt_id)
    }
}

/// Errors submitting a workflow.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The engine could not be reached at all.
    #[error("ComfyUI unreachable: {0}")]
    EngineUnreachable(reqwest::Error),

    /// The engine answered but did not accept the workflow (non-2xx
    /// status, or a body without a prompt id).
    #[error("ComfyUI rejected the workflow ({status}): {body}")]
    EngineRejected { status: u16, body: String },
}

/// Errors querying the history endpoint.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History endpoint unreachable: {0}")]
    Unreachable(reqwest::Error),

    #[error("History response malformed ({status}): {detail}")]
    Malformed { status: u16, detail: String },
}

/// Errors retrieving image bytes from `/view`.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Image fetch failed: {0}")]
    Transport(reqwest::Error),

    #[error("Image fetch returned status {0}")]
    Status(u16),

    #[error("Image fetch returned an empty body")]
    EmptyBody,
}

/// Errors uploading an image to the engine's input store.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Image upload failed: {0}")]
    Transport(reqwest::Error),

    #[error("Image upload rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Image upload response did not contain a stored name")]
    MissingName,
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    /// Base HTTP URL this client targets.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow JSON and the client token
    /// that scopes event delivery. Exactly one job is enqueued per
    /// successful call; this layer never retries.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<Queued, SubmitError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(SubmitError::EngineUnreachable)?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SubmitError::EngineRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|_| SubmitError::EngineRejected {
            status: status.as_u16(),
            body: text,
        })
    }

    /// Retrieve the execution record for a specific prompt.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, HistoryError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await
            .map_err(HistoryError::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Malformed {
                status: status.as_u16(),
                detail: "non-success status".to_string(),
            });
        }

        response.json().await.map_err(|e| HistoryError::Malformed {
            status: status.as_u16(),
            detail: e.to_string(),
        })
    }

    /// Download one produced image from `/view`.
    pub async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(FetchError::Transport)?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(bytes.to_vec())
    }

    /// Stage an image in the engine's input store via
    /// `POST /upload/image`, so a LoadImage node can reference it.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadedImage, UploadError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/png")
            .map_err(UploadError::Transport)?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Transport)?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|_| UploadError::MissingName)
    }
}
