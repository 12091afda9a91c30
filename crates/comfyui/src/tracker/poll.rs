//! Pull-based completion tracking over the history endpoint.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ComfyUIApi;
use crate::outputs::{SlotOutcome, SlotTracker, TrackingResult};
use crate::tracker::TrackError;

/// Poll `GET /history/{prompt_id}` until every expected slot settles
/// or `timeout` elapses.
///
/// Per round, for each still-pending slot:
/// - present in the record with an image -> resolved (first wins);
/// - present without an image -> [`SlotOutcome::NoImage`], terminal --
///   the slot is never polled again;
/// - absent -> still pending; the job may simply not have reached that
///   node yet. The prompt id itself being absent from the record means
///   the same thing for every slot.
///
/// A failing history query is [`TrackError::HistoryUnreachable`] and
/// aborts the whole attempt: an unreachable endpoint will not become
/// "ready" by waiting. On timeout every remaining slot is marked
/// [`SlotOutcome::TimedOut`]; `timeout` of zero settles everything as
/// timed out without issuing a single query.
pub async fn track(
    api: &ComfyUIApi,
    prompt_id: &str,
    expected_slots: &[String],
    timeout: Duration,
    interval: Duration,
) -> Result<TrackingResult, TrackError> {
    if interval.is_zero() {
        return Err(TrackError::InvalidPollInterval);
    }

    let deadline = Instant::now() + timeout;
    let mut tracker = SlotTracker::new(expected_slots);

    while Instant::now() < deadline {
        let history = api
            .get_history(prompt_id)
            .await
            .map_err(|e| TrackError::HistoryUnreachable(e.to_string()))?;

        if let Some(entry) = history.entry(prompt_id) {
            for slot in tracker.pending() {
                match entry.outputs.get(&slot) {
                    Some(output) => {
                        let outcome = match output.first_image() {
                            Some(image) => SlotOutcome::Resolved(image.clone()),
                            None => SlotOutcome::NoImage,
                        };
                        tracing::debug!(prompt_id = %prompt_id, slot = %slot, ?outcome, "Slot settled from history");
                        tracker.record(&slot, outcome);
                    }
                    None => {
                        // Not recorded yet; keep polling this slot.
                    }
                }
            }
        }

        if tracker.is_complete() {
            return Ok(tracker.finish(SlotOutcome::TimedOut));
        }

        tokio::time::sleep_until(deadline.min(Instant::now() + interval)).await;
    }

    tracing::warn!(
        prompt_id = %prompt_id,
        pending = ?tracker.pending(),
        "History polling timed out",
    );
    Ok(tracker.finish(SlotOutcome::TimedOut))
}
