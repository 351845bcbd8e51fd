use super::handler;
use super::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the router with every xorcas endpoint.
///
/// `/debug/*` routes are only mounted when `state.debug` is set.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handler::health))
        .route("/blob/:hash", get(handler::get_blob))
        .route("/internal/blob/:hash", get(handler::get_blob))
        .route("/upload", post(handler::upload))
        .route("/internal/upload", post(handler::internal_upload))
        .route("/list", get(handler::list))
        .route("/digest/:hash", get(handler::digest));

    if state.debug {
        router = router.route("/debug/add-xor/:hash", post(handler::debug_add_xor));
    }

    router
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
