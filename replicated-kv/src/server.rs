//! HTTP surface of a node.
//!
//! Peer RPCs (`/request_vote`, `/append_entries`, `/request_modifications`),
//! the client data API under `/data`, the admin toggle and `/status` all
//! share one axum router. Handlers stay thin: they unpack JSON, call into
//! [`Node`], and map [`NodeError`] onto a status code.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{OriginalUri, Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{NodeError, StorageError};
use crate::message::{
    AppendEntries, CasBody, CreatedBody, ModificationsRequest, ModificationsResponse, NodeStatus,
    ValueBody, VoteRequest, VoteResponse,
};
use crate::modification::ModificationType;
use crate::node::Node;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/request_vote", post(request_vote))
        .route("/append_entries", post(append_entries))
        .route("/request_modifications", post(request_modifications))
        .route("/data", post(create))
        .route("/data/:id", get(read).put(update).delete(delete))
        .route("/data/:id/cas", put(compare_and_swap))
        .route("/disable", post(disable))
        .route("/enable", post(enable))
        .route("/status", get(status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(node)
}

/// Serves `node` on `listener` until `shutdown` resolves.
pub async fn serve_until<F>(listener: TcpListener, node: Arc<Node>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, host = %node.config().own_host(), "listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")
}

pub async fn serve_until_ctrl_c(listener: TcpListener, node: Arc<Node>) -> Result<()> {
    serve_until(listener, node, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
    })
    .await
}

// --- Error mapping ----------------------------------------------------------

/// A failed node operation plus what is needed to answer it over HTTP.
struct ApiError {
    error: NodeError,
    path: String,
    kind: Option<ModificationType>,
}

impl ApiError {
    fn new(error: NodeError, uri: &Uri) -> Self {
        Self {
            error,
            path: uri.path().to_string(),
            kind: None,
        }
    }

    /// Client writes answer a dropped modification differently per type.
    fn write(error: NodeError, uri: &Uri, kind: ModificationType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(error, uri)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.error {
            NodeError::Disabled => (StatusCode::FORBIDDEN, "Server is disabled\n").into_response(),
            NodeError::StaleTerm { .. } => (StatusCode::FORBIDDEN, "Old term\n").into_response(),
            NodeError::NotLeader { leader } => {
                info!(%leader, path = %self.path, "redirecting to leader");
                Redirect::temporary(&format!("{leader}{}", self.path)).into_response()
            }
            NodeError::Storage(StorageError::DroppedModification { .. }) => {
                dropped_response(self.kind)
            }
            err @ (NodeError::Storage(StorageError::GapDetected { .. })
            | NodeError::CatchUpExhausted { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": err.to_string()})))
                    .into_response()
            }
        }
    }
}

fn dropped_response(kind: Option<ModificationType>) -> Response {
    match kind {
        Some(ModificationType::Delete) => not_found(),
        Some(ModificationType::Cas) => (
            StatusCode::PRECONDITION_FAILED,
            Json(json!({"status": "CAS failed"})),
        )
            .into_response(),
        _ => (
            StatusCode::CONFLICT,
            Json(json!({"error": "Ineligible modification"})),
        )
            .into_response(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"status": "Not found"}))).into_response()
}

// --- Peer RPCs --------------------------------------------------------------

async fn request_vote(
    State(node): State<Arc<Node>>,
    OriginalUri(uri): OriginalUri,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, ApiError> {
    let response = node
        .request_vote(request)
        .await
        .map_err(|err| ApiError::new(err, &uri))?;
    Ok(Json(response))
}

async fn append_entries(
    State(node): State<Arc<Node>>,
    OriginalUri(uri): OriginalUri,
    Json(request): Json<AppendEntries>,
) -> Result<StatusCode, ApiError> {
    node.append_entries(request)
        .await
        .map_err(|err| ApiError::new(err, &uri))?;
    Ok(StatusCode::OK)
}

async fn request_modifications(
    State(node): State<Arc<Node>>,
    OriginalUri(uri): OriginalUri,
    Json(request): Json<ModificationsRequest>,
) -> Result<Json<ModificationsResponse>, ApiError> {
    let response = node
        .request_modifications(request.sn_from)
        .await
        .map_err(|err| ApiError::new(err, &uri))?;
    Ok(Json(response))
}

// --- Client data API --------------------------------------------------------

async fn create(
    State(node): State<Arc<Node>>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<ValueBody>,
) -> Result<(StatusCode, Json<CreatedBody>), ApiError> {
    let id = node
        .create(body.value)
        .await
        .map_err(|err| ApiError::write(err, &uri, ModificationType::Create))?;
    Ok((StatusCode::CREATED, Json(CreatedBody { id })))
}

async fn read(
    State(node): State<Arc<Node>>,
    Path(id): Path<u64>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    let value = node
        .read(id)
        .await
        .map_err(|err| ApiError::new(err, &uri))?;
    Ok(match value {
        Some(value) => Json(ValueBody { value }).into_response(),
        None => not_found(),
    })
}

async fn update(
    State(node): State<Arc<Node>>,
    Path(id): Path<u64>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<ValueBody>,
) -> Result<StatusCode, ApiError> {
    node.update(id, body.value)
        .await
        .map_err(|err| ApiError::write(err, &uri, ModificationType::Update))?;
    Ok(StatusCode::OK)
}

async fn delete(
    State(node): State<Arc<Node>>,
    Path(id): Path<u64>,
    OriginalUri(uri): OriginalUri,
) -> Result<StatusCode, ApiError> {
    node.delete(id)
        .await
        .map_err(|err| ApiError::write(err, &uri, ModificationType::Delete))?;
    Ok(StatusCode::OK)
}

async fn compare_and_swap(
    State(node): State<Arc<Node>>,
    Path(id): Path<u64>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<CasBody>,
) -> Result<StatusCode, ApiError> {
    node.compare_and_swap(id, body.old_value, body.value)
        .await
        .map_err(|err| ApiError::write(err, &uri, ModificationType::Cas))?;
    Ok(StatusCode::OK)
}

// --- Administration ---------------------------------------------------------

async fn disable(State(node): State<Arc<Node>>) -> StatusCode {
    node.disable().await;
    StatusCode::OK
}

async fn enable(State(node): State<Arc<Node>>) -> StatusCode {
    node.enable().await;
    StatusCode::OK
}

async fn status(State(node): State<Arc<Node>>) -> Json<NodeStatus> {
    Json(node.status().await)
}
