//! The submit -> track -> fetch pipeline.
//!
//! [`Bridge`] owns the engine clients and the deployment-fixed
//! tracking strategy, and runs one job end to end per caller request:
//! submit the patched workflow, track its declared output slots with
//! the configured strategy, then fetch bytes for every resolved slot.
//! Per-slot failures never touch sibling slots; deciding whether a
//! partially-failed job fails the whole request is the caller's call.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use motif_core::creations::CreationsStore;

use crate::api::{ComfyUIApi, SubmitError, UploadError, UploadedImage};
use crate::client::ComfyUIClient;
use crate::outputs::{ImageRef, SlotOutcome};
use crate::tracker::{poll, stream, TrackError};
use crate::workflow::{Workflow, WorkflowError};

/// How completion is observed. Fixed per deployment, never negotiated
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStrategy {
    /// Subscribe to the WebSocket event stream.
    Events,
    /// Poll the history endpoint.
    Polling,
}

impl FromStr for TrackerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Self::Events),
            "polling" => Ok(Self::Polling),
            other => Err(format!(
                "unknown tracking strategy '{other}', expected 'events' or 'polling'"
            )),
        }
    }
}

/// Everything a [`Bridge`] needs, passed in at construction.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Engine HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// Engine WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
    pub strategy: TrackerStrategy,
    /// Overall deadline for one tracking attempt.
    pub track_timeout: Duration,
    /// Cadence of history polling (polling strategy only).
    pub poll_interval: Duration,
    /// Optional best-effort local persistence of fetched artifacts.
    pub creations: Option<CreationsStore>,
}

/// One fully-fetched output slot: the artifact, or why there is none.
#[derive(Debug)]
pub enum SlotArtifact {
    Ready { reference: ImageRef, bytes: Vec<u8> },
    Failed { reason: String },
}

impl SlotArtifact {
    pub fn is_ready(&self) -> bool {
        matches!(self, SlotArtifact::Ready { .. })
    }
}

/// Result of one pipeline run: every declared slot, fetched or failed.
#[derive(Debug)]
pub struct JobOutputs {
    pub prompt_id: String,
    pub slots: BTreeMap<String, SlotArtifact>,
}

impl JobOutputs {
    /// True when at least one slot produced an artifact.
    pub fn any_succeeded(&self) -> bool {
        self.slots.values().any(SlotArtifact::is_ready)
    }

    /// Take the artifact for a single-output job's one slot.
    pub fn into_slot(mut self, slot: &str) -> Option<SlotArtifact> {
        self.slots.remove(slot)
    }
}

/// Structural pipeline failures. Per-slot conditions live in
/// [`JobOutputs`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Template(#[from] WorkflowError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Drives one ComfyUI instance on behalf of caller requests.
///
/// Cheap to share behind an `Arc`; each request runs the pipeline
/// independently with its own client token and (for the event-stream
/// strategy) its own exclusively-owned subscription.
pub struct Bridge {
    api: ComfyUIApi,
    client: ComfyUIClient,
    strategy: TrackerStrategy,
    track_timeout: Duration,
    poll_interval: Duration,
    creations: Option<CreationsStore>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            api: ComfyUIApi::new(config.api_url),
            client: ComfyUIClient::new(config.ws_url),
            strategy: config.strategy,
            track_timeout: config.track_timeout,
            poll_interval: config.poll_interval,
            creations: config.creations,
        }
    }

    pub fn strategy(&self) -> TrackerStrategy {
        self.strategy
    }

    /// Stage a caller-supplied image in the engine's input store.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadedImage, PipelineError> {
        let uploaded = self.api.upload_image(bytes, filename).await?;
        tracing::info!(name = %uploaded.name, subfolder = %uploaded.subfolder, "Uploaded image to ComfyUI input store");
        Ok(uploaded)
    }

    /// Run one job end to end.
    ///
    /// `workflow` must already be patched for this request -- the
    /// pipeline submits it verbatim. `label` seeds the filenames of
    /// locally persisted artifacts.
    pub async fn run_job(
        &self,
        workflow: &Workflow,
        expected_slots: &[String],
        label: &str,
    ) -> Result<JobOutputs, PipelineError> {
        // Fresh token per request; the event subscription must be
        // scoped by the same token the submission carried.
        let client_id = uuid::Uuid::new_v4().to_string();

        let queued = self
            .api
            .submit_workflow(&workflow.to_json(), &client_id)
            .await?;
        tracing::info!(
            prompt_id = %queued.prompt_id,
            queue_position = queued.number,
            "Workflow submitted to ComfyUI",
        );

        let tracking = match self.strategy {
            TrackerStrategy::Events => {
                stream::track(
                    &self.client,
                    &self.api,
                    &client_id,
                    &queued.prompt_id,
                    expected_slots,
                    self.track_timeout,
                )
                .await?
            }
            TrackerStrategy::Polling => {
                poll::track(
                    &self.api,
                    &queued.prompt_id,
                    expected_slots,
                    self.track_timeout,
                    self.poll_interval,
                )
                .await?
            }
        };

        let mut slots = BTreeMap::new();
        for (slot, outcome) in tracking {
            let artifact = match outcome {
                SlotOutcome::Resolved(image) => match self.api.fetch_image(&image).await {
                    Ok(bytes) => {
                        if let Some(store) = &self.creations {
                            store
                                .save_best_effort(&format!("{label}_{slot}"), &bytes)
                                .await;
                        }
                        SlotArtifact::Ready {
                            reference: image,
                            bytes,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            prompt_id = %queued.prompt_id,
                            slot = %slot,
                            error = %e,
                            "Failed to fetch resolved image",
                        );
                        SlotArtifact::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
                other => SlotArtifact::Failed {
                    reason: other
                        .failure_reason()
                        .unwrap_or_else(|| "unresolved".to_string()),
                },
            };
            slots.insert(slot, artifact);
        }

        Ok(JobOutputs {
            prompt_id: queued.prompt_id,
            slots,
        })
    }
}
