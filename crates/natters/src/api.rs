//! HTTP API for friend management and presence.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`; the
//! token's identity is the acting user.
//!
//! Endpoints:
//! - POST   /friends/requests         : send a friend request (and notify)
//! - GET    /friends/requests         : pending requests for me
//! - POST   /friends/requests/handle  : accept or decline a request
//! - GET    /friends                  : my friends with remark, dnd, presence
//! - PUT    /friends/:friend/remark   : set my remark for a friend
//! - GET    /friends/:friend/remark
//! - PUT    /friends/:friend/dnd      : mute or unmute a friend
//! - GET    /friends/:friend/dnd
//! - DELETE /friends/:friend          : unfriend
//! - GET    /presence/:uid            : is a user online
//! - GET    /health

use crate::notify::Notification;
use crate::server::ServerState;
use crate::store::StoreError;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use natter_common::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned to HTTP callers as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed or rejected bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The request is well-formed JSON but not acceptable.
    #[error("invalid request: {0}")]
    BadRequest(String),
    /// The friend store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Store(e) => {
                tracing::error!("friend store failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Request body for POST /friends/requests.
#[derive(Debug, Deserialize)]
pub struct AddRequestBody {
    /// Identity to befriend.
    pub to: String,
    /// Verification message shown to the recipient.
    #[serde(default)]
    pub message: String,
}

/// Request body for POST /friends/requests/handle.
#[derive(Debug, Deserialize)]
pub struct HandleRequestBody {
    /// Identity that sent the request.
    pub from: String,
    /// Accept (`true`) or decline (`false`).
    pub accept: bool,
}

/// Request body for PUT /friends/:friend/remark.
#[derive(Debug, Deserialize, Serialize)]
pub struct RemarkBody {
    /// Remark text; empty clears it.
    pub remark: String,
}

/// Request body for PUT /friends/:friend/dnd.
#[derive(Debug, Deserialize, Serialize)]
pub struct DndBody {
    /// Mute notifications caused by this friend.
    pub dnd: bool,
}

/// One entry of GET /friends.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendView {
    /// Friend identity.
    pub uid: UserId,
    /// My remark for this friend.
    pub remark: String,
    /// Whether I muted this friend.
    pub dnd: bool,
    /// Whether this friend has a live session.
    pub online: bool,
}

/// Response for GET /presence/:uid.
#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceView {
    /// Queried identity.
    pub uid: UserId,
    /// Whether it has a live session.
    pub online: bool,
}

/// Resolve the acting user from the `Authorization` header.
fn caller(state: &ServerState, headers: &HeaderMap) -> ApiResult<UserId> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    state
        .auth
        .authenticate(token)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))
}

fn identity(raw: &str, field: &str) -> ApiResult<UserId> {
    if raw.is_empty() {
        return Err(ApiError::BadRequest(format!("`{field}` must not be empty")));
    }
    Ok(UserId::from(raw))
}

/// POST /friends/requests: record a request and notify the recipient.
async fn add_request(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<AddRequestBody>,
) -> ApiResult<StatusCode> {
    let me = caller(&state, &headers)?;
    let to = identity(&body.to, "to")?;
    state.store.add_request(&me, &to, &body.message)?;
    state
        .dispatcher()
        .dispatch(&Notification::friend_request(&me, &to, &body.message));
    tracing::debug!(from = %me, to = %to, "friend request added");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /friends/requests: pending requests addressed to me.
async fn list_requests(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> ApiResult<Json<HashMap<UserId, String>>> {
    let me = caller(&state, &headers)?;
    Ok(Json(state.store.get_requests(&me)?))
}

/// POST /friends/requests/handle: resolve a request sent to me.
async fn handle_request(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<HandleRequestBody>,
) -> ApiResult<StatusCode> {
    let me = caller(&state, &headers)?;
    let from = identity(&body.from, "from")?;
    state.store.handle_request(&from, &me, body.accept)?;
    tracing::debug!(from = %from, to = %me, accept = body.accept, "friend request handled");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /friends: my friends, with my attributes and their presence.
async fn list_friends(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<FriendView>>> {
    let me = caller(&state, &headers)?;
    let mut friends = Vec::new();
    for uid in state.store.get_friends(&me)? {
        friends.push(FriendView {
            remark: state.store.get_remark(&me, &uid)?,
            dnd: state.store.get_dnd(&me, &uid)?,
            online: state.registry.is_online(&uid),
            uid,
        });
    }
    Ok(Json(friends))
}

async fn set_remark(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(friend): Path<String>,
    Json(body): Json<RemarkBody>,
) -> ApiResult<StatusCode> {
    let me = caller(&state, &headers)?;
    state
        .store
        .set_remark(&me, &UserId::from(friend), &body.remark)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_remark(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(friend): Path<String>,
) -> ApiResult<Json<RemarkBody>> {
    let me = caller(&state, &headers)?;
    let remark = state.store.get_remark(&me, &UserId::from(friend))?;
    Ok(Json(RemarkBody { remark }))
}

async fn set_dnd(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(friend): Path<String>,
    Json(body): Json<DndBody>,
) -> ApiResult<StatusCode> {
    let me = caller(&state, &headers)?;
    state.store.set_dnd(&me, &UserId::from(friend), body.dnd)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_dnd(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(friend): Path<String>,
) -> ApiResult<Json<DndBody>> {
    let me = caller(&state, &headers)?;
    let dnd = state.store.get_dnd(&me, &UserId::from(friend))?;
    Ok(Json(DndBody { dnd }))
}

async fn delete_friend(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(friend): Path<String>,
) -> ApiResult<StatusCode> {
    let me = caller(&state, &headers)?;
    state.store.delete_friend(&me, &UserId::from(friend))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /presence/:uid: read from the session registry.
async fn presence(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> ApiResult<Json<PresenceView>> {
    caller(&state, &headers)?;
    let uid = UserId::from(uid);
    Ok(Json(PresenceView {
        online: state.registry.is_online(&uid),
        uid,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Build the API router over shared server state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/friends", get(list_friends))
        .route("/friends/requests", post(add_request).get(list_requests))
        .route("/friends/requests/handle", post(handle_request))
        .route("/friends/:friend", axum::routing::delete(delete_friend))
        .route("/friends/:friend/remark", put(set_remark).get(get_remark))
        .route("/friends/:friend/dnd", put(set_dnd).get(get_dnd))
        .route("/presence/:uid", get(presence))
        .route("/health", get(health))
        .with_state(state)
}

/// # Errors
///
/// Returns an error if binding the API listener fails.
pub async fn start_api_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("api server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
