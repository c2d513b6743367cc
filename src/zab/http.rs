//! HTTP surface of a node
//!
//! Client writes pass two middlewares before reaching the handler:
//! - `queue_middleware` (outermost) admits writes in client-timestamp order
//! - `write_ops_middleware` relays the write to the leader when this node follows
//!
//! Peer protocol routes take JSON bodies and read the sender from
//! [`SENDER_HEADER`].

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};
use crate::zab::broadcast::AtomicBroadcast;
use crate::zab::election::{ElectionOps, ElectionOutcome};
use crate::zab::messages::{
    ordering_key, routes, Acknowledgment, ElectionRequest, LeaderAnnouncement, MergeSummary,
    MetadataBatch, MetadataRequest, Proposal, SyncAck, SyncProbe, SyncReport, WriteRequest,
    WriteResponse, FORWARDED_HEADER, SENDER_HEADER,
};
use crate::zab::peer_client::is_hop_header;
use crate::zab::proposal::ProposalOps;
use crate::zab::state::Vote;
use crate::zab::sync::SyncOps;
use crate::ztree::Metadata;
use axum::{
    body::{to_bytes, Body},
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct ZabState {
    pub ab: Arc<AtomicBroadcast>,
    pub proposal: ProposalOps,
    pub sync: SyncOps,
    pub election: ElectionOps,
    pub max_body_bytes: usize,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn sender(headers: &HeaderMap) -> String {
    header_value(headers, SENDER_HEADER).unwrap_or_else(|| "unknown".to_string())
}

/// Hold every client write in the ordering queue until it is the oldest one
async fn queue_middleware(State(state): State<ZabState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Error::InvalidRequest(format!("failed to read request body: {}", e))
                .into_response()
        }
    };

    let timestamp = ordering_key(&bytes).unwrap_or_else(|| {
        warn!("Write without a readable timestamp, queued first");
        String::new()
    });

    let ticket = state.ab.queue().enqueue(timestamp).await;
    debug!(timestamp = %ticket.timestamp(), "Write admitted");
    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    ticket.dequeue();
    response
}

/// Followers relay writes to the leader verbatim; the leader lets them through
async fn write_ops_middleware(
    State(state): State<ZabState>,
    request: Request,
    next: Next,
) -> Response {
    if state.ab.is_leader() {
        return next.run(request).await;
    }

    let leader = state.ab.leader();
    if request.headers().contains_key(FORWARDED_HEADER) {
        warn!(leader = %leader, "Forwarded write reached a non-leader");
        return Error::NotLeader(leader).into_response();
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Error::InvalidRequest(format!("failed to read request body: {}", e))
                .into_response()
        }
    };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(routes::WRITE);

    match state
        .ab
        .forward_to_leader(parts.method.clone(), path_and_query, &parts.headers, bytes)
        .await
    {
        Ok(relayed) => {
            let mut response = Response::new(Body::from(relayed.body));
            *response.status_mut() = relayed.status;
            for (name, value) in &relayed.headers {
                if !is_hop_header(name) {
                    response.headers_mut().append(name.clone(), value.clone());
                }
            }
            response
        }
        Err(e) => {
            error!(leader = %leader, "Failed to forward request: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to forward request").into_response()
        }
    }
}

/// Client write, reached on the leader only
async fn client_write(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(request): Json<WriteRequest>,
) -> Result<Json<WriteResponse>> {
    let origin = header_value(&headers, FORWARDED_HEADER).unwrap_or_else(|| state.ab.me().to_string());
    let response = state.proposal.submit(request, origin).await?;
    Ok(Json(response))
}

async fn propose_write(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(proposal): Json<Proposal>,
) -> Result<StatusCode> {
    state.proposal.handle_propose(&sender(&headers), proposal)?;
    Ok(StatusCode::ACCEPTED)
}

async fn acknowledge_proposal(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(ack): Json<Acknowledgment>,
) -> Json<Vote> {
    Json(state.proposal.handle_acknowledge(&sender(&headers), ack))
}

async fn commit_write(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(commit): Json<Proposal>,
) -> Result<StatusCode> {
    let outcome = state.proposal.handle_commit(&sender(&headers), commit)?;
    Ok(if outcome.inserted() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

async fn write_metadata(
    State(state): State<ZabState>,
    Json(record): Json<Metadata>,
) -> Result<StatusCode> {
    let outcome = state.proposal.write_metadata(&record)?;
    Ok(if outcome.inserted() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

async fn sync_request(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(probe): Json<SyncProbe>,
) -> StatusCode {
    state.sync.handle_sync_request(&sender(&headers), probe);
    StatusCode::ACCEPTED
}

async fn sync_response(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(ack): Json<SyncAck>,
) -> Json<Vote> {
    Json(state.sync.handle_sync_response(&sender(&headers), ack))
}

async fn request_metadata(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(request): Json<MetadataRequest>,
) -> Result<Json<MergeSummary>> {
    let summary = state
        .sync
        .handle_request_metadata(&sender(&headers), request)
        .await?;
    Ok(Json(summary))
}

async fn update_metadata(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(batch): Json<MetadataBatch>,
) -> Json<MergeSummary> {
    Json(state.sync.handle_update_metadata(&sender(&headers), batch))
}

async fn elect_leader(
    State(state): State<ZabState>,
    Json(request): Json<ElectionRequest>,
) -> Result<Json<ElectionOutcome>> {
    if let Some(incoming) = &request.incoming {
        debug!(from = %incoming, "Election handed over");
    }
    Ok(Json(state.election.start_election().await?))
}

async fn declare_leader_receive(
    State(state): State<ZabState>,
    headers: HeaderMap,
    Json(announcement): Json<LeaderAnnouncement>,
) -> Result<StatusCode> {
    state
        .election
        .receive_declaration(&sender(&headers), announcement)?;
    Ok(StatusCode::OK)
}

async fn list_metadata(State(state): State<ZabState>) -> Result<Json<Vec<Metadata>>> {
    Ok(Json(state.ab.store().records_after(0)?))
}

async fn get_metadata(
    State(state): State<ZabState>,
    Path(node_id): Path<u64>,
) -> Result<Json<Metadata>> {
    state
        .ab
        .store()
        .get(node_id)?
        .map(Json)
        .ok_or(Error::NotFound(node_id))
}

/// Identity and role of this member
async fn health(State(state): State<ZabState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "id": state.ab.me(),
        "leader": state.ab.leader(),
        "role": state.ab.role(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": crate::common::timestamp_now(),
    }))
}

/// 200 once a sync round has completed since startup
async fn health_ready(State(state): State<ZabState>) -> impl IntoResponse {
    let synced = state.ab.is_synced();
    let status = if synced {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": synced,
            "sync": state.ab.sync().current(),
            "leader": state.ab.leader(),
        })),
    )
}

async fn admin_status(State(state): State<ZabState>) -> Result<impl IntoResponse> {
    Ok(Json(state.ab.status()?))
}

async fn admin_sync(State(state): State<ZabState>) -> Result<Json<SyncReport>> {
    Ok(Json(state.sync.run().await?))
}

pub fn create_router(state: ZabState) -> Router {
    let writes = Router::new()
        .route(routes::WRITE, post(client_write))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            write_ops_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            queue_middleware,
        ));

    Router::new()
        .merge(writes)
        // Proposal protocol
        .route(routes::PROPOSE_WRITE, post(propose_write))
        .route(routes::ACKNOWLEDGE_PROPOSAL, post(acknowledge_proposal))
        .route(routes::COMMIT_WRITE, post(commit_write))
        .route(routes::WRITE_METADATA, post(write_metadata))
        // Sync protocol
        .route(routes::SYNC_REQUEST, post(sync_request))
        .route(routes::SYNC_RESPONSE, post(sync_response))
        .route(routes::REQUEST_METADATA, post(request_metadata))
        .route(routes::UPDATE_METADATA, post(update_metadata))
        // Leader election
        .route(routes::ELECT_LEADER, post(elect_leader))
        .route(routes::DECLARE_LEADER_RECEIVE, post(declare_leader_receive))
        // Reads
        .route(routes::METADATA, get(list_metadata))
        .route(routes::METADATA_BY_ID, get(get_metadata))
        // Health & admin
        .route(routes::HEALTH, get(health))
        .route(routes::HEALTH_LIVE, get(health_live))
        .route(routes::HEALTH_READY, get(health_ready))
        .route(routes::ADMIN_STATUS, get(admin_status))
        .route(routes::ADMIN_SYNC, post(admin_sync))
        .layer(middleware::from_fn(request_tracing_middleware))
        .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeConfig;
    use crate::ztree::MemoryStore;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    const A: &str = "127.0.0.1:7000";

    fn single_node(sync_on_startup: bool) -> Router {
        let config = NodeConfig {
            id: A.into(),
            servers: vec![A.into()],
            leader: A.into(),
            sync_on_startup,
            ..Default::default()
        };
        let ab = Arc::new(AtomicBroadcast::new(&config, Arc::new(MemoryStore::new())).unwrap());
        let sync = SyncOps::new(ab.clone());
        create_router(ZabState {
            proposal: ProposalOps::new(ab.clone()),
            election: ElectionOps::new(ab.clone(), sync.clone()),
            sync,
            ab,
            max_body_bytes: 64 * 1024,
        })
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_single_node_write_and_read() {
        let router = single_node(false);

        let (status, _) = call(&router, "GET", "/metadata/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = json!({ "payload": "x", "timestamp": "2026-01-01T00:00:01Z" });
        let (status, written) = call(&router, "POST", routes::WRITE, Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(written["node_id"], 1);
        assert_eq!(written["leader"], A);

        let (status, record) = call(&router, "GET", "/metadata/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["payload"], "x");
        assert_eq!(record["origin"], A);
    }

    #[tokio::test]
    async fn test_ready_after_sync() {
        let router = single_node(true);

        let (status, ready) = call(&router, "GET", routes::HEALTH_READY, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ready["ready"], false);

        let (status, report) = call(&router, "POST", routes::ADMIN_SYNC, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["round"], 1);

        let (status, _) = call(&router, "GET", routes::HEALTH_READY, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_proposal_reusing_committed_id_gets_conflict() {
        let router = single_node(false);
        let body = json!({ "payload": "x", "timestamp": "2026-01-01T00:00:01Z" });
        let (status, _) = call(&router, "POST", routes::WRITE, Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let record = json!({
            "node_id": 1,
            "origin": A,
            "leader": A,
            "servers": [A],
            "timestamp": "2026-01-01T00:00:02Z",
            "payload": "other",
        });
        let proposal = json!({ "round": 7, "record": record });
        let (status, error) = call(&router, "POST", routes::PROPOSE_WRITE, Some(proposal)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(error["error"].as_str().unwrap().contains("zxid 1"));

        let (_, kept) = call(&router, "GET", "/metadata/1", None).await;
        assert_eq!(kept["payload"], "x");
    }

    #[tokio::test]
    async fn test_declaration_from_stranger_is_rejected() {
        let router = single_node(false);
        let body = json!({ "incoming": "10.0.0.9:7000" });
        let (status, error) = call(&router, "POST", routes::DECLARE_LEADER_RECEIVE, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error["error"].as_str().unwrap().contains("not an ensemble member"));
    }
}
