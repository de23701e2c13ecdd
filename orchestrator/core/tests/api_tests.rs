// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{store, CopyMirror, FakeRuntime};
use playbin_core::application::lifecycle::LifecycleManager;
use playbin_core::presentation::api::{router, ApiState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> (Router, Arc<FakeRuntime>) {
    app_with(|state| state)
}

fn app_with(configure: impl FnOnce(ApiState) -> ApiState) -> (Router, Arc<FakeRuntime>) {
    let config = json!({
        "users": {
            "alice": { "password": "secret", "permissions": {
                "mc1": ["container.read", "container.write", "container.execute.start", "container.execute.stop", "container.execute.restore"]
            } },
            "bob": { "password": "hunter2", "permissions": { "*": ["container.read"] } },
            "carol": { "password": "opensesame", "permissions": { "*": ["container.*"] } }
        },
        "servers": {
            "mc1": { "compose": { "image": "itzg/minecraft-server" } },
            "mc2": {}
        }
    });
    let runtime = FakeRuntime::new();
    let lifecycle = Arc::new(LifecycleManager::new(
        store(&config.to_string()),
        runtime.clone(),
        CopyMirror::new(),
    ));
    (router(Arc::new(configure(ApiState::new(lifecycle)))), runtime)
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_login_and_session_required() {
    let (app, _) = app();

    let (status, _) = call(
        &app,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": "alice", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/servers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/servers", Some("forged"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_server_listing_shows_state_and_allowed_actions() {
    let (app, runtime) = app();
    runtime.add_container("mc1", true, &[]);

    let token = login(&app, "alice", "secret").await;
    let (status, body) = call(&app, "GET", "/api/servers", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{ "name": "mc1", "state": "running", "busy": false, "actions": ["start", "stop", "restore"] }])
    );

    let token = login(&app, "bob", "hunter2").await;
    let (_, body) = call(&app, "GET", "/api/servers", Some(&token), None).await;
    let names: Vec<&str> = body.as_array().unwrap().iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["mc1", "mc2"]);
    assert_eq!(body[1]["state"], "missing");
}

#[tokio::test]
async fn test_actions_map_errors_to_status_codes() {
    let (app, runtime) = app();
    let token = login(&app, "alice", "secret").await;

    let (status, _) = call(&app, "POST", "/api/servers/mc1/actions/start", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(runtime.calls(), vec!["create mc1", "start mc1"]);

    // Already exists
    let (status, body) = call(&app, "POST", "/api/servers/mc1/actions/start", Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = call(&app, "POST", "/api/servers/mc1/actions/kill", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, "POST", "/api/servers/mc1/actions/explode", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/servers/mc1/actions/stop", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(runtime.count("stop mc1"), 1);
}

#[tokio::test]
async fn test_restore_backups_and_console_command() {
    let (app, runtime) = app();
    let token = login(&app, "alice", "secret").await;

    let (status, body) = call(&app, "GET", "/api/servers/mc1/backups", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = call(
        &app,
        "POST",
        "/api/servers/mc1/restore",
        Some(&token),
        Some(json!({ "generation": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/api/servers/mc1/restore",
        Some(&token),
        Some(json!({ "generation": "20260101_000000" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        "/api/servers/mc1/command",
        Some(&token),
        Some(json!({ "command": "say hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(runtime.calls(), vec!["input mc1 say hello\n"]);

    let (status, _) = call(
        &app,
        "POST",
        "/api/servers/mc2/command",
        Some(&token),
        Some(json!({ "command": "say hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_inspect_and_recent_logs() {
    let (app, runtime) = app();
    runtime.add_container("mc1", true, &[("/data", Path::new("/srv/mc1"))]);
    let lines: Vec<String> = (1..=150).map(|i| format!("line {}", i)).collect();
    runtime.push_logs("mc1", &lines.iter().map(String::as_str).collect::<Vec<_>>());

    let token = login(&app, "bob", "hunter2").await;
    let (status, body) = call(&app, "GET", "/api/servers/mc1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
    assert_eq!(body["running"], true);
    assert_eq!(body["mounts"][0]["destination"], "/data");

    let (status, body) = call(&app, "GET", "/api/servers/mc1/logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.as_array().unwrap();
    assert_eq!(body.len(), 100);
    assert_eq!(body[0], "line 51");
    assert_eq!(body[99], "line 150");

    let (_, body) = call(&app, "GET", "/api/servers/mc1/logs?tail=2", Some(&token), None).await;
    assert_eq!(body, json!(["line 149", "line 150"]));

    // Configured, but no container yet
    let (status, _) = call(&app, "GET", "/api/servers/mc2", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/api/servers/mc2/logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let token = login(&app, "alice", "secret").await;
    let (status, _) = call(&app, "GET", "/api/servers/mc2/logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unconfigured_containers_are_not_addressable() {
    let (app, runtime) = app();
    runtime.add_container("postgres", true, &[]);
    let token = login(&app, "carol", "opensesame").await;

    for action in ["stop", "kill", "remove"] {
        let uri = format!("/api/servers/postgres/actions/{}", action);
        let (status, body) = call(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }
    let (status, _) = call(&app, "GET", "/api/servers/postgres", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_logout_and_session_expiry() {
    let (app, _) = app();
    let token = login(&app, "bob", "hunter2").await;

    let (status, _) = call(&app, "GET", "/api/servers", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "POST", "/api/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "GET", "/api/servers", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (app, _) = app_with(|state| state.with_session_ttl(Duration::ZERO));
    let token = login(&app, "bob", "hunter2").await;
    let (status, body) = call(&app, "GET", "/api/servers", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("expired"));
}
