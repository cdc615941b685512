mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::*;
use natter_common::frame::{Kind, Notice};
use natter_common::UserId;
use natters::api::{self, FriendView};
use natters::server::ServerState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

async fn call(
    state: &Arc<ServerState>,
    method: Method,
    uri: &str,
    as_user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(uid) = as_user {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token_for(uid)));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = api::router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn befriend(state: &Arc<ServerState>, a: &str, b: &str) {
    let (status, _) = call(
        state,
        Method::POST,
        "/friends/requests",
        Some(a),
        Some(json!({ "to": b, "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(
        state,
        Method::POST,
        "/friends/requests/handle",
        Some(b),
        Some(json!({ "from": a, "accept": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn health_needs_no_token() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));
    let (status, body) = call(&state, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));

    let (status, body) = call(&state, Method::GET, "/friends", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("unauthorized"));

    let req = Request::builder()
        .uri("/friends")
        .header(header::AUTHORIZATION, "Bearer forged.token")
        .body(Body::empty())
        .unwrap();
    let resp = api::router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn request_accept_and_list_friends() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));

    let (status, _) = call(
        &state,
        Method::POST,
        "/friends/requests",
        Some("alice"),
        Some(json!({ "to": "bob", "message": "it's alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&state, Method::GET, "/friends/requests", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    let pending: HashMap<String, String> = serde_json::from_value(body).unwrap();
    assert_eq!(pending.get("alice").map(String::as_str), Some("it's alice"));

    let (status, _) = call(
        &state,
        Method::POST,
        "/friends/requests/handle",
        Some("bob"),
        Some(json!({ "from": "alice", "accept": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&state, Method::GET, "/friends/requests", Some("bob"), None).await;
    assert_eq!(body, json!({}));

    let (_, body) = call(&state, Method::GET, "/friends", Some("alice"), None).await;
    let friends: Vec<FriendView> = serde_json::from_value(body).unwrap();
    assert_eq!(
        friends,
        vec![FriendView {
            uid: UserId::from("bob"),
            remark: String::new(),
            dnd: false,
            online: false,
        }]
    );

    let (_, body) = call(&state, Method::GET, "/friends", Some("bob"), None).await;
    let friends: Vec<FriendView> = serde_json::from_value(body).unwrap();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].uid, UserId::from("alice"));
}

#[tokio::test]
async fn declined_request_creates_no_edge() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));

    call(
        &state,
        Method::POST,
        "/friends/requests",
        Some("alice"),
        Some(json!({ "to": "bob" })),
    )
    .await;
    let (status, _) = call(
        &state,
        Method::POST,
        "/friends/requests/handle",
        Some("bob"),
        Some(json!({ "from": "alice", "accept": false })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&state, Method::GET, "/friends", Some("alice"), None).await;
    assert_eq!(body, json!([]));
    let (_, body) = call(&state, Method::GET, "/friends/requests", Some("bob"), None).await;
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn empty_recipient_is_bad_request() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));
    let (status, body) = call(
        &state,
        Method::POST,
        "/friends/requests",
        Some("alice"),
        Some(json!({ "to": "", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("to"));
}

#[tokio::test]
async fn remark_and_dnd_are_per_direction() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));
    befriend(&state, "alice", "bob").await;

    let (status, _) = call(
        &state,
        Method::PUT,
        "/friends/bob/remark",
        Some("alice"),
        Some(json!({ "remark": "Bobby" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(
        &state,
        Method::PUT,
        "/friends/bob/dnd",
        Some("alice"),
        Some(json!({ "dnd": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&state, Method::GET, "/friends/bob/remark", Some("alice"), None).await;
    assert_eq!(body, json!({ "remark": "Bobby" }));
    let (_, body) = call(&state, Method::GET, "/friends/bob/dnd", Some("alice"), None).await;
    assert_eq!(body, json!({ "dnd": true }));

    let (_, body) = call(&state, Method::GET, "/friends/alice/remark", Some("bob"), None).await;
    assert_eq!(body, json!({ "remark": "" }));
    let (_, body) = call(&state, Method::GET, "/friends/alice/dnd", Some("bob"), None).await;
    assert_eq!(body, json!({ "dnd": false }));
}

#[tokio::test]
async fn delete_friend_removes_both_sides() {
    let state = make_state(test_config("127.0.0.1:0".parse().unwrap()));
    befriend(&state, "alice", "bob").await;

    let (status, _) = call(&state, Method::DELETE, "/friends/bob", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&state, Method::GET, "/friends", Some("alice"), None).await;
    assert_eq!(body, json!([]));
    let (_, body) = call(&state, Method::GET, "/friends", Some("bob"), None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn presence_reflects_live_sessions() {
    let (addr, state) = start_server().await;

    let (_, body) = call(&state, Method::GET, "/presence/bob", Some("alice"), None).await;
    assert_eq!(body["online"], false);

    let _bob = TestClient::connect(&addr, "bob").await;
    let (status, body) = call(&state, Method::GET, "/presence/bob", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uid"], "bob");
    assert_eq!(body["online"], true);
}

#[tokio::test]
async fn friend_request_is_pushed_to_online_recipient() {
    let (addr, state) = start_server().await;
    let mut bob = TestClient::connect(&addr, "bob").await;

    let (status, _) = call(
        &state,
        Method::POST,
        "/friends/requests",
        Some("alice"),
        Some(json!({ "to": "bob", "message": "add me" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let frame = bob.recv_frame().await;
    assert_eq!(frame.kind, Kind::Notification(Notice::FriendRequest));
    assert_eq!(frame.from, "alice");
    assert_eq!(frame.to, "bob");
    assert_eq!(frame.content, "add me");
}
