//! Polling-tracker behaviour against a mocked history endpoint.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use motif_comfyui::api::ComfyUIApi;
use motif_comfyui::outputs::SlotOutcome;
use motif_comfyui::tracker::{poll, TrackError};

fn slots(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn resolves_slot_from_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-1": {"outputs": {"7": {"images": [{"filename": "a.png"}]}}}
        })))
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let result = poll::track(
        &api,
        "p-1",
        &slots(&["7"]),
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    let image = result.get("7").unwrap().image().unwrap();
    assert_eq!(image.filename, "a.png");
    assert_eq!(image.subfolder, "");
    assert_eq!(image.kind, "output");
}

#[tokio::test]
async fn slot_appearing_on_a_later_round_is_picked_up() {
    let server = MockServer::start().await;
    // First round: the prompt is not in the record yet.
    Mock::given(method("GET"))
        .and(path("/history/p-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-2": {"outputs": {"7": {"images": [{"filename": "late.png"}]}}}
        })))
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let result = poll::track(
        &api,
        "p-2",
        &slots(&["7"]),
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7").unwrap().image().unwrap().filename, "late.png");
}

#[tokio::test]
async fn missing_slot_times_out_while_others_resolve() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-3": {"outputs": {
                "20": {"images": [{"filename": "rmbg.png"}]},
                "26": {"images": [{"filename": "inspyrenet.png"}]},
            }}
        })))
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let result = poll::track(
        &api,
        "p-3",
        &slots(&["20", "26", "27"]),
        Duration::from_millis(200),
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    assert_eq!(result.len(), 3);
    assert!(result.get("20").unwrap().image().is_some());
    assert!(result.get("26").unwrap().image().is_some());
    assert_eq!(result.get("27"), Some(&SlotOutcome::TimedOut));
}

#[tokio::test]
async fn slot_without_images_is_no_image_and_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-4": {"outputs": {"7": {"images": []}}}
        })))
        // NoImage settles the only slot on the first round, so the
        // tracker must return without polling again.
        .expect(1)
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let result = poll::track(
        &api,
        "p-4",
        &slots(&["7"]),
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7"), Some(&SlotOutcome::NoImage));
}

#[tokio::test]
async fn unreachable_history_endpoint_is_fatal() {
    // Nothing listens on this port.
    let api = ComfyUIApi::new("http://127.0.0.1:1");
    let err = poll::track(
        &api,
        "p-5",
        &slots(&["7"]),
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap_err();

    assert_matches!(err, TrackError::HistoryUnreachable(_));
}

#[tokio::test]
async fn server_error_from_history_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-6"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let err = poll::track(
        &api,
        "p-6",
        &slots(&["7"]),
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap_err();

    assert_matches!(err, TrackError::HistoryUnreachable(_));
}

#[tokio::test]
async fn zero_interval_is_a_configuration_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let err = poll::track(
        &api,
        "p-7",
        &slots(&["7"]),
        Duration::from_secs(5),
        Duration::ZERO,
    )
    .await
    .unwrap_err();

    assert_matches!(err, TrackError::InvalidPollInterval);
}

#[tokio::test]
async fn zero_timeout_returns_immediately_with_all_slots_timed_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let api = ComfyUIApi::new(server.uri());
    let result = poll::track(
        &api,
        "p-8",
        &slots(&["7", "9"]),
        Duration::ZERO,
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    assert_eq!(result.get("7"), Some(&SlotOutcome::TimedOut));
    assert_eq!(result.get("9"), Some(&SlotOutcome::TimedOut));
}
