pub mod health;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /generate            text prompt -> one image (POST)
/// /remove-background   uploaded image -> per-model cutouts (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::generate::generate))
        .route(
            "/remove-background",
            post(handlers::remove_background::remove_background),
        )
}
