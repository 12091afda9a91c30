//! Server and engine configuration loaded from environment variables.
//!
//! All fields have defaults suitable for a local ComfyUI at its
//! standard port. There is no process-wide mutable state: the parsed
//! config is passed explicitly into each component at construction.

use std::time::Duration;

use motif_comfyui::pipeline::TrackerStrategy;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Must exceed the tracking
    /// timeout or every slow generation dies at the HTTP layer first.
    pub request_timeout_secs: u64,
    pub engine: EngineConfig,
}

/// Everything about the ComfyUI instance this deployment talks to.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// Engine WebSocket base URL, derived from `api_url`.
    pub ws_url: String,
    /// Completion-tracking strategy, fixed per deployment.
    pub strategy: TrackerStrategy,
    pub track_timeout: Duration,
    pub poll_interval: Duration,
    /// Directory generated images are persisted into (best effort).
    pub creations_dir: String,
    pub generate: GenerateWorkflow,
    pub remove_background: RemoveBackgroundWorkflow,
}

/// Node wiring of the text-to-image workflow template.
#[derive(Debug, Clone)]
pub struct GenerateWorkflow {
    pub workflow_path: String,
    /// Node whose `inputs.text` receives the caller's prompt.
    pub prompt_node: String,
    /// Sampler node whose `inputs.seed` is randomized per submission.
    /// Unset when the template has no patchable sampler.
    pub seed_node: Option<String>,
    /// The single expected output slot.
    pub output_node: String,
}

/// Node wiring of the background-removal workflow template.
#[derive(Debug, Clone)]
pub struct RemoveBackgroundWorkflow {
    pub workflow_path: String,
    /// LoadImage node whose `inputs.image` receives the staged upload.
    pub input_node: String,
    /// Expected output slots, one per removal model in the template.
    pub output_nodes: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                   |
    /// |-------------------------|---------------------------|
    /// | `HOST`                  | `0.0.0.0`                 |
    /// | `PORT`                  | `3000`                    |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`  | `300`                     |
    /// | `COMFYUI_URL`           | `http://127.0.0.1:8188`   |
    /// | `TRACKING_STRATEGY`     | `events`                  |
    /// | `TRACK_TIMEOUT_SECS`    | `120`                     |
    /// | `POLL_INTERVAL_SECS`    | `2`                       |
    /// | `CREATIONS_DIR`         | `creations`               |
    /// | `GENERATE_WORKFLOW`     | `workflow_api.json`       |
    /// | `PROMPT_NODE_ID`        | `2`                       |
    /// | `SEED_NODE_ID`          | `4` (empty disables)      |
    /// | `OUTPUT_NODE_ID`        | `7`                       |
    /// | `RMBG_WORKFLOW`         | `FAST_RMBG.json`          |
    /// | `RMBG_INPUT_NODE_ID`    | `3`                       |
    /// | `RMBG_OUTPUT_NODE_IDS`  | `20,26,27`                |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = split_csv(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".into()),
        );

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            engine: EngineConfig::from_env(),
        }
    }
}

impl EngineConfig {
    fn from_env() -> Self {
        let api_url =
            std::env::var("COMFYUI_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());
        let ws_url = derive_ws_url(&api_url);

        let strategy: TrackerStrategy = std::env::var("TRACKING_STRATEGY")
            .unwrap_or_else(|_| "events".into())
            .parse()
            .expect("TRACKING_STRATEGY must be 'events' or 'polling'");

        let track_timeout_secs: u64 = std::env::var("TRACK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .expect("TRACK_TIMEOUT_SECS must be a valid u64");

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let seed_node = std::env::var("SEED_NODE_ID").unwrap_or_else(|_| "4".into());

        Self {
            api_url,
            ws_url,
            strategy,
            track_timeout: Duration::from_secs(track_timeout_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            creations_dir: std::env::var("CREATIONS_DIR").unwrap_or_else(|_| "creations".into()),
            generate: GenerateWorkflow {
                workflow_path: std::env::var("GENERATE_WORKFLOW")
                    .unwrap_or_else(|_| "workflow_api.json".into()),
                prompt_node: std::env::var("PROMPT_NODE_ID").unwrap_or_else(|_| "2".into()),
                seed_node: (!seed_node.is_empty()).then_some(seed_node),
                output_node: std::env::var("OUTPUT_NODE_ID").unwrap_or_else(|_| "7".into()),
            },
            remove_background: RemoveBackgroundWorkflow {
                workflow_path: std::env::var("RMBG_WORKFLOW")
                    .unwrap_or_else(|_| "FAST_RMBG.json".into()),
                input_node: std::env::var("RMBG_INPUT_NODE_ID").unwrap_or_else(|_| "3".into()),
                output_nodes: split_csv(
                    &std::env::var("RMBG_OUTPUT_NODE_IDS").unwrap_or_else(|_| "20,26,27".into()),
                ),
            },
        }
    }
}

/// Derive the WebSocket base URL from the HTTP base URL.
fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{api_url}")
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
