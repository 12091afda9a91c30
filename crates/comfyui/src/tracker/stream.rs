//! Push-based completion tracking over the WebSocket event stream.
//!
//! One subscription per tracked job, scoped by the client token used
//! at submission. Frames are consumed strictly in arrival order --
//! later frames may depend on which slots earlier frames already
//! settled -- under a single absolute deadline.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;

use crate::api::ComfyUIApi;
use crate::client::ComfyUIClient;
use crate::messages::{parse_message, ComfyUIMessage};
use crate::outputs::{SlotOutcome, SlotTracker, TrackingResult};
use crate::tracker::{lookup_slot, TrackError};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Track a submitted prompt over the event stream until every expected
/// slot settles or `timeout` elapses.
///
/// The only structural failure is an event stream that cannot be
/// opened ([`TrackError::ConnectionFailed`]). Everything after that --
/// timeout, a dropped connection, a failed fallback lookup -- settles
/// the affected slots in the returned result instead, so partial
/// progress is never discarded.
pub async fn track(
    client: &ComfyUIClient,
    api: &ComfyUIApi,
    client_id: &str,
    prompt_id: &str,
    expected_slots: &[String],
    timeout: Duration,
) -> Result<TrackingResult, TrackError> {
    let deadline = Instant::now() + timeout;
    let tracker = SlotTracker::new(expected_slots);

    // The deadline covers connection establishment too: a timeout of
    // zero settles every slot as timed out without opening anything.
    let conn = match timeout_at(deadline, client.connect(client_id)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(TrackError::ConnectionFailed(e.to_string())),
        Err(_) => return Ok(tracker.finish(SlotOutcome::TimedOut)),
    };

    let mut ws = conn.ws_stream;
    let result = listen(&mut ws, api, prompt_id, tracker, deadline).await;

    // The subscription must be closed on every exit path; the engine
    // caps concurrent subscriptions per client.
    if let Err(e) = ws.close(None).await {
        tracing::debug!(error = %e, "Error closing ComfyUI event stream");
    }

    Ok(result)
}

/// Consume frames until every slot settles, the deadline passes, or
/// the transport dies. Always yields a result covering every slot.
async fn listen(
    ws: &mut WsStream,
    api: &ComfyUIApi,
    prompt_id: &str,
    mut tracker: SlotTracker,
    deadline: Instant,
) -> TrackingResult {
    loop {
        if tracker.is_complete() {
            return tracker.finish(SlotOutcome::TimedOut);
        }

        let frame = match timeout_at(deadline, ws.next()).await {
            Err(_) => {
                tracing::warn!(prompt_id = %prompt_id, pending = ?tracker.pending(), "Event stream tracking timed out");
                return tracker.finish(SlotOutcome::TimedOut);
            }
            Ok(None) => {
                return tracker.finish(SlotOutcome::Failed(
                    "event stream ended before all outputs settled".to_string(),
                ));
            }
            Ok(Some(Err(e))) => {
                tracing::error!(prompt_id = %prompt_id, error = %e, "Event stream receive error");
                return tracker.finish(SlotOutcome::Failed(format!("event stream error: {e}")));
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                handle_text_frame(&text, api, prompt_id, &mut tracker).await;
            }
            Message::Binary(_) => {
                // Preview images; not correlated to output slots.
                tracing::trace!(prompt_id = %prompt_id, "Ignoring binary frame (preview image)");
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Handled automatically by tungstenite.
            }
            Message::Close(frame) => {
                tracing::info!(prompt_id = %prompt_id, ?frame, "ComfyUI closed the event stream");
                return tracker.finish(SlotOutcome::Failed(
                    "server closed the event stream".to_string(),
                ));
            }
            Message::Frame(_) => {}
        }
    }
}

/// Classify one text frame and apply it to the tracker.
async fn handle_text_frame(
    text: &str,
    api: &ComfyUIApi,
    prompt_id: &str,
    tracker: &mut SlotTracker,
) {
    match parse_message(text) {
        Ok(ComfyUIMessage::Executed(data)) if data.prompt_id == prompt_id => {
            if !tracker.is_pending(&data.node) {
                // Undeclared node, or a repeated frame for a slot that
                // already settled -- first resolution wins.
                tracing::debug!(
                    prompt_id = %prompt_id,
                    node = %data.node,
                    "Ignoring executed frame for settled or undeclared node",
                );
                return;
            }
            match data.output.first_image() {
                Some(image) => {
                    tracing::info!(
                        prompt_id = %prompt_id,
                        node = %data.node,
                        filename = %image.filename,
                        "Slot resolved from executed frame",
                    );
                    tracker.record(&data.node, SlotOutcome::Resolved(image.clone()));
                }
                None => {
                    // The node finished without inline image data; the
                    // history record for this one slot is authoritative.
                    tracing::debug!(
                        prompt_id = %prompt_id,
                        node = %data.node,
                        "Executed frame carried no image, falling back to history",
                    );
                    let outcome = lookup_slot(api, prompt_id, &data.node).await;
                    tracker.record(&data.node, outcome);
                }
            }
        }
        Ok(ComfyUIMessage::Executing(data)) if data.prompt_id == prompt_id => {
            match data.node {
                Some(node) => {
                    tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
                }
                None => {
                    // Whole-job-finished signal: nothing further will
                    // arrive on the stream, so the history record
                    // settles everything still pending.
                    tracing::info!(prompt_id = %prompt_id, "Execution completed, settling remaining slots from history");
                    settle_pending_from_history(api, prompt_id, tracker).await;
                }
            }
        }
        Ok(ComfyUIMessage::Progress(data)) => {
            tracing::trace!(value = data.value, max = data.max, "Generation progress");
        }
        Ok(ComfyUIMessage::Status(data)) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
        }
        Ok(ComfyUIMessage::ExecutionError(data)) if data.prompt_id == prompt_id => {
            // Not correlated to a slot here; the job-finished fallback
            // reports the gap per slot.
            tracing::error!(
                prompt_id = %prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
        }
        Ok(_) => {
            // Frames for other prompts, cache notices, start markers.
        }
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
        }
    }
}

/// Settle every still-pending slot from the history record after the
/// job-finished signal. A slot absent from a finished job's outputs
/// will never produce an image.
async fn settle_pending_from_history(
    api: &ComfyUIApi,
    prompt_id: &str,
    tracker: &mut SlotTracker,
) {
    let pending = tracker.pending();
    if pending.is_empty() {
        return;
    }

    let history = match api.get_history(prompt_id).await {
        Ok(history) => history,
        Err(e) => {
            for slot in pending {
                tracker.record(&slot, SlotOutcome::Failed(format!("history lookup failed: {e}")));
            }
            return;
        }
    };

    let entry = history.entry(prompt_id);
    for slot in pending {
        let outcome = match entry.and_then(|e| e.outputs.get(&slot)) {
            Some(output) => match output.first_image() {
                Some(image) => SlotOutcome::Resolved(image.clone()),
                None => SlotOutcome::NoImage,
            },
            None => SlotOutcome::NoImage,
        };
        tracker.record(&slot, outcome);
    }
}
