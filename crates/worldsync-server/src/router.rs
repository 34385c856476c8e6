//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket` + static files) into a single
//! [`Router`] with CORS and request tracing.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router.
///
/// The router includes:
/// - `GET /` -- redirect to `/static/index.html`
/// - `GET /subscribe` -- `WebSocket` subscription
/// - `GET|POST|PUT /entity/{entity}` -- read or replace one entity
/// - `GET|POST /world` -- whole-world read
/// - `GET|POST /clear` -- reset the world
/// - `GET /api/status` -- counters
/// - `/static/*` -- files under `static_dir`
///
/// CORS allows any origin so a client page served elsewhere can connect.
pub fn build_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        // WebSocket
        .route("/subscribe", get(ws::ws_subscribe))
        // REST pass-through
        .route(
            "/entity/{entity}",
            get(handlers::get_entity)
                .post(handlers::put_entity)
                .put(handlers::put_entity),
        )
        .route("/world", get(handlers::get_world).post(handlers::get_world))
        .route("/clear", get(handlers::clear_world).post(handlers::clear_world))
        .route("/api/status", get(handlers::status))
        // Static client
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
