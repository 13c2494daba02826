//! Sync endpoint routes.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use listsync_engine::MergeableContent;

use crate::auth::AuthToken;
use crate::error::Result;
use crate::groups::{GroupRegistry, GroupSnapshot};
use crate::handlers::{handle_pull, handle_push, handle_websocket_connection, PushResponse};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/{group_id}", get(websocket_handler).post(push_handler))
        .route("/sync/{group_id}/snapshot", get(snapshot_handler))
}

/// GET /sync/{group_id} - Upgrade to a sync WebSocket.
async fn websocket_handler(
    State(state): State<AppState>,
    _auth: AuthToken,
    Path(group_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    GroupRegistry::validate_group_id(&group_id)?;
    let groups = state.groups.clone();
    let conn_manager = state.conn_manager.clone();
    Ok(ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, groups, conn_manager, group_id)
    }))
}

/// POST /sync/{group_id} - Push changes without a WebSocket.
async fn push_handler(
    State(state): State<AppState>,
    _auth: AuthToken,
    Path(group_id): Path<String>,
    Json(changes): Json<MergeableContent>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(&state.groups, &state.conn_manager, &group_id, None, changes)?;
    Ok(Json(response))
}

/// GET /sync/{group_id}/snapshot - Current merged content of a group.
async fn snapshot_handler(
    State(state): State<AppState>,
    _auth: AuthToken,
    Path(group_id): Path<String>,
) -> Result<Json<GroupSnapshot>> {
    let snapshot = handle_pull(&state.groups, &group_id)?;
    Ok(Json(snapshot))
}
