//! Listsync Server - relays and merges group content between replicas.
//!
//! Each sync group has one server-side replica. Clients connect over
//! WebSocket at `/sync/{group_id}`, load the group's content, and push their
//! changes; the server merges every push and relays it to the group's other
//! connections.

pub mod auth;
pub mod config;
pub mod error;
pub mod groups;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::config::Config;
use crate::groups::GroupRegistry;
use crate::websocket::ConnectionManager;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub groups: Arc<GroupRegistry>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            groups: GroupRegistry::new_shared(),
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

/// Build the router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
