//! ==============================================================================
//! web.rs - served endpoint for the address space
//! ==============================================================================
//!
//! purpose:
//!     json view of the address space for dashboards and scripts. protocol
//!     clients use the opc.tcp endpoint (endpoint.rs); this server adds the
//!     bridge counters, historized samples and a server-sent-event feed of
//!     value changes.
//!
//! routes:
//!     GET /api/info                  server identity, opc ua endpoint, namespace
//!     GET /api/nodes                 tree below the root container
//!     GET /api/nodes/:ns/:id         one node and its descendants
//!     GET /api/history/:ns/:id       historized samples of a variable
//!     GET /api/subscribe             server-sent events, one per value change
//!     GET /api/stats                 synchronizer counters
//!
//! ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::get,
    Router,
};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::address_space::{AddressSpace, NodeView, Sample, ServerInfo};
use crate::error::BridgeError;
use crate::publisher::NodeId;
use crate::sync::{StatsSnapshot, SyncStats};

#[derive(Clone)]
pub struct WebState {
    pub space: AddressSpace,
    pub stats: Arc<SyncStats>,
    /// root container of the sensor subtrees
    pub root: NodeId,
}

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(serde_json::json!({"status": "error", "message": message.into()})),
    )
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        let status = match e {
            BridgeError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::NotAVariable(_) | BridgeError::NotAnObject(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, e.to_string())
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/info", get(info_handler))
        .route("/api/nodes", get(tree_handler))
        .route("/api/nodes/:ns/:id", get(node_handler))
        .route("/api/history/:ns/:id", get(history_handler))
        .route("/api/subscribe", get(subscribe_handler))
        .route("/api/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: WebState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %bind, "served endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn info_handler(State(state): State<WebState>) -> Json<ServerInfo> {
    Json(state.space.info())
}

async fn tree_handler(State(state): State<WebState>) -> ApiResult<NodeView> {
    state
        .space
        .browse(state.root)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "root container missing"))
}

async fn node_handler(
    State(state): State<WebState>,
    Path((ns, id)): Path<(u16, u32)>,
) -> ApiResult<NodeView> {
    let node = NodeId::new(ns, id);
    state
        .space
        .browse(node)
        .map(Json)
        .ok_or_else(|| BridgeError::NodeNotFound(node).into())
}

async fn history_handler(
    State(state): State<WebState>,
    Path((ns, id)): Path<(u16, u32)>,
) -> ApiResult<Vec<Sample>> {
    match state.space.history(NodeId::new(ns, id)).await? {
        Some(samples) => Ok(Json(samples)),
        None => Err(api_error(StatusCode::NOT_FOUND, "historization is disabled")),
    }
}

async fn stats_handler(State(state): State<WebState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

async fn subscribe_handler(
    State(state): State<WebState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let changes = stream::unfold(state.space.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let event = Event::default().event("data-change").json_data(&change);
                    return Some((event, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagging, value changes dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(changes).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{HistorySettings, OBJECTS_FOLDER};
    use crate::domain::{SlotValue, ValueType};
    use crate::publisher::PublishingServer;

    async fn state(history: bool) -> (WebState, NodeId) {
        let space = AddressSpace::new(
            Arc::new(opcua::sync::RwLock::new(
                opcua::server::prelude::AddressSpace::new(),
            )),
            "test",
            "opc.tcp://localhost:4840/",
            "urn:test",
            HistorySettings {
                enabled: history,
                capacity: 10,
            },
        )
        .unwrap();
        let root = space.create_object(OBJECTS_FOLDER, "Sensors").await.unwrap();
        let tag = space.create_object(root, "RuuviTag AA").await.unwrap();
        let var = space
            .create_attribute(tag, "Temperature", SlotValue::Double(0.0), ValueType::Double)
            .await
            .unwrap();
        space.write_value(var, SlotValue::Double(21.5)).await.unwrap();
        let state = WebState {
            space,
            stats: Arc::new(SyncStats::default()),
            root,
        };
        (state, var)
    }

    #[tokio::test]
    async fn test_tree_lists_subtrees() {
        let (state, _) = state(false).await;
        let Json(tree) = tree_handler(State(state)).await.unwrap();
        assert_eq!(tree.browse_name, "Sensors");
        assert_eq!(tree.children[0].browse_name, "RuuviTag AA");
        assert_eq!(
            tree.children[0].children[0].value,
            Some(SlotValue::Double(21.5))
        );
    }

    #[tokio::test]
    async fn test_unknown_node_is_404() {
        let (state, _) = state(false).await;
        let ns = state.space.namespace_index();
        let (status, _) = node_handler(State(state), Path((ns, 99_999))).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_endpoint() {
        let (state, var) = state(true).await;
        let Json(samples) = history_handler(State(state), Path((var.namespace, var.id)))
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, SlotValue::Double(21.5));

        let (state, var) = self::state(false).await;
        let (status, _) = history_handler(State(state.clone()), Path((var.namespace, var.id)))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = history_handler(State(state.clone()), Path((state.root.namespace, state.root.id)))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_info_reports_endpoint() {
        let (state, _) = state(true).await;
        let Json(info) = info_handler(State(state)).await;
        assert_eq!(info.endpoint, "opc.tcp://localhost:4840/");
        assert_eq!(info.namespace_uri, "urn:test");
        assert!(info.historizing);
    }

    #[tokio::test]
    async fn test_stats_start_idle() {
        let (state, _) = state(false).await;
        let Json(stats) = stats_handler(State(state)).await;
        assert_eq!(stats.state, "idle");
        assert_eq!(stats.readings_dispatched, 0);
    }
}
