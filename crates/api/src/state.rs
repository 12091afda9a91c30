use std::sync::Arc;

use motif_comfyui::pipeline::Bridge;
use motif_comfyui::workflow::Workflow;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`). The
/// workflow templates are parsed once at startup and only ever read --
/// each request patches its own deep copy.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Engine pipeline (submit, track, fetch).
    pub bridge: Arc<Bridge>,
    /// Text-to-image workflow template.
    pub generate_workflow: Arc<Workflow>,
    /// Background-removal workflow template.
    pub remove_background_workflow: Arc<Workflow>,
}
