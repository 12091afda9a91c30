//! Completion tracking for submitted jobs.
//!
//! A submitted prompt settles its declared output slots through one of
//! two deployment-fixed strategies:
//!
//! - [`stream`] subscribes to the engine's WebSocket event stream and
//!   resolves slots as `executed` frames arrive, falling back to
//!   history lookups for frames without image data.
//! - [`poll`] queries `GET /history/{prompt_id}` on a fixed cadence
//!   until every slot settles or the deadline passes.
//!
//! Both return a [`TrackingResult`](crate::outputs::TrackingResult)
//! covering exactly the declared slots. Errors here are structural
//! only (no connection, no history endpoint); per-slot conditions are
//! recorded in the result instead.

pub mod poll;
pub mod stream;

use crate::api::ComfyUIApi;
use crate::outputs::SlotOutcome;

/// Structural tracking failures that abort the whole attempt.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The event stream could not be opened at all.
    #[error("Failed to open the ComfyUI event stream: {0}")]
    ConnectionFailed(String),

    /// A history query failed mid-poll. Infrastructure failure, not
    /// "job not ready yet" -- polling aborts rather than retrying
    /// indefinitely.
    #[error("History endpoint unreachable: {0}")]
    HistoryUnreachable(String),

    /// The configured poll interval is zero. Raised before the first
    /// poll.
    #[error("Poll interval must be greater than zero")]
    InvalidPollInterval,
}

/// Settle one slot from the history record.
///
/// Used by the event-stream tracker when an `executed` frame for the
/// slot carried no image data: the node has finished, so its record
/// should exist -- any gap is an explicit per-slot failure, never a
/// reason to keep waiting.
pub(crate) async fn lookup_slot(api: &ComfyUIApi, prompt_id: &str, slot: &str) -> SlotOutcome {
    let history = match api.get_history(prompt_id).await {
        Ok(history) => history,
        Err(e) => return SlotOutcome::Failed(format!("history lookup failed: {e}")),
    };

    let Some(entry) = history.entry(prompt_id) else {
        return SlotOutcome::Failed(format!("prompt {prompt_id} not present in history"));
    };

    match entry.outputs.get(slot) {
        Some(output) => match output.first_image() {
            Some(image) => SlotOutcome::Resolved(image.clone()),
            None => SlotOutcome::NoImage,
        },
        None => SlotOutcome::Failed(format!("history has no output recorded for node {slot}")),
    }
}
