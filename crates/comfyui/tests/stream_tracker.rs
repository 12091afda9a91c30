//! Event-stream tracker behaviour against a scripted local WebSocket
//! server, with wiremock standing in for the history endpoint where a
//! fallback lookup is expected.

use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use motif_comfyui::api::ComfyUIApi;
use motif_comfyui::client::ComfyUIClient;
use motif_comfyui::outputs::SlotOutcome;
use motif_comfyui::tracker::{stream, TrackError};

fn slots(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Spawn a WebSocket server that sends the given text frames to the
/// first client, then sends a close frame once `close_after` is set.
/// Returns the `ws://` base URL.
async fn scripted_ws_server(frames: Vec<serde_json::Value>, close_after: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else {
            return;
        };
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        for frame in frames {
            if ws.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
        if close_after {
            let _ = ws.close(None).await;
            return;
        }
        // Keep the connection open until the client closes it, so the
        // tracker decides when to stop, not the server.
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = ws.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await;
    });

    format!("ws://{addr}")
}

fn executed(prompt_id: &str, node: &str, filename: Option<&str>) -> serde_json::Value {
    let output = match filename {
        Some(name) => json!({"images": [{"filename": name}]}),
        None => json!({}),
    };
    json!({"type": "executed", "data": {"node": node, "prompt_id": prompt_id, "output": output}})
}

fn job_finished(prompt_id: &str) -> serde_json::Value {
    json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}})
}

/// History endpoint that must never be consulted.
async fn untouched_history() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn resolves_slot_from_executed_frame() {
    let ws_url = scripted_ws_server(
        vec![
            json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 1}}}}),
            executed("p-1", "7", Some("a.png")),
        ],
        false,
    )
    .await;
    let history = untouched_history().await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-1",
        &slots(&["7"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let image = result.get("7").unwrap().image().unwrap();
    assert_eq!(image.filename, "a.png");
    assert_eq!(image.subfolder, "");
    assert_eq!(image.kind, "output");
}

#[tokio::test]
async fn duplicate_executed_frame_does_not_overwrite() {
    let ws_url = scripted_ws_server(
        vec![
            executed("p-2", "7", Some("first.png")),
            executed("p-2", "7", Some("second.png")),
            executed("p-2", "8", Some("b.png")),
        ],
        false,
    )
    .await;
    let history = untouched_history().await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-2",
        &slots(&["7", "8"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "first.png");
    assert_eq!(result.get("8").unwrap().image().unwrap().filename, "b.png");
}

#[tokio::test]
async fn frames_for_other_prompts_are_ignored() {
    let ws_url = scripted_ws_server(
        vec![
            executed("someone-else", "7", Some("theirs.png")),
            executed("p-3", "7", Some("ours.png")),
        ],
        false,
    )
    .await;
    let history = untouched_history().await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-3",
        &slots(&["7"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "ours.png");
}

#[tokio::test]
async fn executed_without_image_falls_back_to_single_slot_lookup() {
    let history = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-4": {"outputs": {"7": {"images": [{"filename": "from-history.png"}]}}}
        })))
        .expect(1)
        .mount(&history)
        .await;

    let ws_url = scripted_ws_server(vec![executed("p-4", "7", None)], false).await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-4",
        &slots(&["7"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(
        result.get("7").unwrap().image().unwrap().filename,
        "from-history.png"
    );
}

#[tokio::test]
async fn job_finished_settles_pending_slots_from_history() {
    let history = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-5": {"outputs": {
                "7": {"images": [{"filename": "a.png"}]},
                "9": {"images": [{"filename": "i.png"}]},
            }}
        })))
        .mount(&history)
        .await;

    let ws_url = scripted_ws_server(
        vec![executed("p-5", "7", Some("a.png")), job_finished("p-5")],
        false,
    )
    .await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-5",
        &slots(&["7", "9"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "a.png");
    assert_eq!(result.get("9").unwrap().image().unwrap().filename, "i.png");
}

#[tokio::test]
async fn job_finished_with_no_record_for_a_slot_is_no_image() {
    let history = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-6": {"outputs": {"7": {"images": [{"filename": "a.png"}]}}}
        })))
        .mount(&history)
        .await;

    let ws_url = scripted_ws_server(vec![job_finished("p-6")], false).await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-6",
        &slots(&["7", "27"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "a.png");
    assert_eq!(result.get("27"), Some(&SlotOutcome::NoImage));
}

#[tokio::test]
async fn zero_timeout_returns_immediately_all_timed_out() {
    // Nothing ever listens here; with a zero deadline the tracker must
    // not even wait on the connection attempt.
    let client = ComfyUIClient::new("ws://127.0.0.1:1");
    let api = ComfyUIApi::new("http://127.0.0.1:1");

    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-7",
        &slots(&["7", "9"]),
        Duration::ZERO,
    )
    .await
    .unwrap();

    assert_eq!(result.get("7"), Some(&SlotOutcome::TimedOut));
    assert_eq!(result.get("9"), Some(&SlotOutcome::TimedOut));
}

#[tokio::test]
async fn unreachable_event_stream_is_connection_failed() {
    let client = ComfyUIClient::new("ws://127.0.0.1:1");
    let api = ComfyUIApi::new("http://127.0.0.1:1");

    let err = stream::track(
        &client,
        &api,
        "tok",
        "p-8",
        &slots(&["7"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    assert_matches!(err, TrackError::ConnectionFailed(_));
}

#[tokio::test]
async fn server_close_marks_remaining_slots_failed() {
    let ws_url = scripted_ws_server(vec![executed("p-9", "7", Some("a.png"))], true).await;
    let history = untouched_history().await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-9",
        &slots(&["7", "9"]),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    // Partial progress survives; the unsettled slot records the
    // connection loss.
    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "a.png");
    assert_matches!(result.get("9"), Some(SlotOutcome::Failed(_)));
}

#[tokio::test]
async fn timeout_marks_unsettled_slots_timed_out() {
    // The server sends one of the two expected outputs and then holds
    // the connection open past the tracking deadline.
    let ws_url = scripted_ws_server(vec![executed("p-10", "7", Some("a.png"))], false).await;
    let history = untouched_history().await;

    let client = ComfyUIClient::new(ws_url);
    let api = ComfyUIApi::new(history.uri());
    let result = stream::track(
        &client,
        &api,
        "tok",
        "p-10",
        &slots(&["7", "9"]),
        Duration::from_millis(300),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "a.png");
    assert_eq!(result.get("9"), Some(&SlotOutcome::TimedOut));
}
