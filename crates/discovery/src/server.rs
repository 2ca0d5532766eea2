//! Discovery HTTP server
//!
//! Served inside the VPN only, bound on the node's mesh IP. Peers first pull
//! the header list, then fetch individual host files that are newer than
//! what they already hold.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use tincmesh_common::names::canonical;
use tincmesh_daemon::DaemonConfig;

use crate::ssd::{Entity, Ssd};

/// Fixed in-mesh TCP port of the gossip service
pub const DISCOVERY_PORT: u16 = 18655;

/// Shared state of the discovery routes
#[derive(Clone)]
pub struct DiscoveryState {
    pub ssd: Arc<Ssd>,
    pub config: Arc<DaemonConfig>,
}

/// Build the discovery router
pub fn router(state: DiscoveryState) -> Router {
    Router::new()
        .route("/hosts", get(list_hosts))
        .route("/host/:name", get(get_host))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn list_hosts(State(state): State<DiscoveryState>) -> Json<Vec<Entity>> {
    Json(state.ssd.header())
}

#[derive(Deserialize)]
struct AfterQuery {
    after: Option<i64>,
}

async fn get_host(
    State(state): State<DiscoveryState>,
    Path(name): Path<String>,
    Query(query): Query<AfterQuery>,
) -> Response {
    let name = canonical(&name);
    let after = query.after.unwrap_or(0);

    let Some(entity) = state.ssd.get_if_newer(&name, after) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.config.host(&name) {
        Ok(content) => (
            [
                ("x-name", entity.name.clone()),
                ("x-version", entity.version.to_string()),
            ],
            content,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
