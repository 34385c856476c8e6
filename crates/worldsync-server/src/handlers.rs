//! REST pass-through handlers.
//!
//! Each endpoint maps straight onto one [`WorldStore`] call and carries no
//! logic of its own.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Redirect to the bundled client |
//! | `POST`/`PUT` | `/entity/{entity}` | Replace one entity's fields |
//! | `GET` | `/entity/{entity}` | One entity's fields (`{}` if absent) |
//! | `GET`/`POST` | `/world` | The whole world |
//! | `GET`/`POST` | `/clear` | Silently reset the world |
//! | `GET` | `/api/status` | Entity, listener, and session counts |
//!
//! [`WorldStore`]: worldsync_core::WorldStore

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::Redirect;
use serde_json::{Map, Value};
use worldsync_core::{Fields, WorldMap};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /` -- send browsers to the static client page.
pub async fn index() -> Redirect {
    Redirect::temporary("/static/index.html")
}

/// `POST|PUT /entity/{entity}` -- replace an entity's fields.
///
/// The body is read as raw JSON whatever its content type, shaped
/// `{entity: fields}`. Responds with `{entity: fields}` as stored.
pub async fn put_entity(
    Path(entity): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Value::Object(mut body) = serde_json::from_slice::<Value>(&body)? else {
        return Err(ApiError::NotAnObject);
    };
    let fields = match body.remove(&entity) {
        Some(Value::Object(fields)) => fields,
        Some(_) => return Err(ApiError::InvalidFields(entity)),
        None => return Err(ApiError::MissingEntity(entity)),
    };

    state.world.set(&entity, fields);

    let stored = state.world.get(&entity);
    let mut response = Map::new();
    response.insert(entity, Value::Object(stored));
    Ok(Json(Value::Object(response)))
}

/// `GET /entity/{entity}` -- one entity's fields.
pub async fn get_entity(
    Path(entity): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Json<Fields> {
    Json(state.world.get(&entity))
}

/// `GET|POST /world` -- the whole world.
pub async fn get_world(State(state): State<Arc<AppState>>) -> Json<WorldMap> {
    Json(state.world.snapshot())
}

/// `GET|POST /clear` -- reset the world without notifying subscribers.
pub async fn clear_world(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.world.clear();
    Json(Value::Object(Map::new()))
}

/// `GET /api/status` -- counts for monitoring.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "entities": state.world.entity_count(),
        "listeners": state.world.listener_count(),
        "sessions": state.session_count(),
    }))
}
