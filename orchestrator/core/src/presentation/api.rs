// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP API
//!
//! Thin JSON front end over [`LifecycleManager`]. Every route except login and
//! health needs a bearer token handed out by `POST /api/login`; tokens live in
//! memory only, expire after [`SESSION_TTL`] and are lost on restart.
//!
//! | Method | Path | Permission |
//! |--------|------|------------|
//! | POST | `/api/login` | none |
//! | POST | `/api/logout` | session |
//! | GET | `/api/health` | none |
//! | GET | `/api/servers` | `container.read` per listed server |
//! | GET | `/api/servers/{name}` | `container.read` |
//! | GET | `/api/servers/{name}/logs?tail=N` | `container.read` |
//! | POST | `/api/servers/{name}/actions/{action}` | per action |
//! | GET | `/api/servers/{name}/backups` | `container.read` |
//! | POST | `/api/servers/{name}/restore` | `container.execute.restore` |
//! | POST | `/api/servers/{name}/command` | `container.write` |
//!
//! Only configured servers are addressable; other container names on the
//! host answer 404 whatever the caller's wildcard grants.
//!
//! Actions run in a detached task with their own deadline, so a client that
//! hangs up does not abort a backup halfway.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::application::lifecycle::LifecycleManager;
use crate::domain::action::{Action, UnknownAction};
use crate::domain::error::{ErrorKind, LifecycleError};
use crate::domain::permission;
use crate::domain::runtime::{MountPoint, RuntimeError};

/// Deadline of one action or restore started over HTTP
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Lifetime of a login token
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Log lines returned when the request names no `tail`
pub const DEFAULT_LOG_TAIL: usize = 100;
const MAX_LOG_TAIL: usize = 10_000;

struct Session {
    username: String,
    issued: Instant,
}

pub struct ApiState {
    lifecycle: Arc<LifecycleManager>,
    sessions: DashMap<String, Session>,
    action_timeout: Duration,
    session_ttl: Duration,
    started: Instant,
}

impl ApiState {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            lifecycle,
            sessions: DashMap::new(),
            action_timeout: ACTION_TIMEOUT,
            session_ttl: SESSION_TTL,
            started: Instant::now(),
        }
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn prune_sessions(&self) {
        let ttl = self.session_ttl;
        self.sessions.retain(|_, session| session.issued.elapsed() < ttl);
    }

    /// Fail with NotFound unless `server` is in the current config
    fn configured(&self, server: &str) -> Result<(), ApiError> {
        if self.lifecycle.config().get().servers.contains_key(server) {
            Ok(())
        } else {
            Err(LifecycleError::ServerNotFound(server.to_string()).into())
        }
    }

    /// Fail unless `user` holds `required` on `server`; denials are audited
    fn require(&self, user: &AuthUser, server: &str, required: &str) -> Result<(), ApiError> {
        if self
            .lifecycle
            .config()
            .get()
            .user_has_permission(&user.0, server, required)
        {
            return Ok(());
        }
        warn!(user = %user.0, server = %server, permission = required, "Request denied");
        Err(LifecycleError::PermissionDenied(format!(
            "'{}' lacks {} on '{}'",
            user.0, required, server
        ))
        .into())
    }

    /// Run `work` on its own task with a fresh token cancelled at the deadline
    async fn detached<F, Fut>(&self, work: F) -> Result<(), ApiError>
    where
        F: FnOnce(Arc<LifecycleManager>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), LifecycleError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let timeout = self.action_timeout;
        let work = work(self.lifecycle.clone(), cancel.clone());

        let handle = tokio::spawn(async move {
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout = ?timeout, "Action deadline reached, cancelling");
                    cancel.cancel();
                    work.await
                }
            }
        });

        match handle.await {
            Ok(result) => result.map_err(ApiError::from),
            Err(e) => Err(ApiError::Internal(e.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None),
            ApiError::Lifecycle(e) => {
                let kind = e.kind();
                let status = match kind {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                    ErrorKind::Engine | ErrorKind::PartialFailure | ErrorKind::Cancelled => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, Some(kind))
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, Some(ErrorKind::Engine)),
        };
        (status, Json(json!({ "error": self.to_string(), "kind": kind }))).into_response()
    }
}

/// Username behind a valid bearer token
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

impl FromRequestParts<Arc<ApiState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).ok_or(ApiError::Unauthorized("Missing bearer token"))?;

        let user = {
            let session = state
                .sessions
                .get(token)
                .ok_or(ApiError::Unauthorized("Unknown session"))?;
            (session.issued.elapsed() < state.session_ttl).then(|| AuthUser(session.username.clone()))
        };
        match user {
            Some(user) => Ok(user),
            None => {
                state.sessions.remove(token);
                Err(ApiError::Unauthorized("Session expired"))
            }
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/health", get(health))
        .route("/api/servers", get(list_servers))
        .route("/api/servers/{name}", get(inspect_server))
        .route("/api/servers/{name}/logs", get(server_logs))
        .route("/api/servers/{name}/actions/{action}", post(run_action))
        .route("/api/servers/{name}/backups", get(list_backups))
        .route("/api/servers/{name}/restore", post(restore))
        .route("/api/servers/{name}/command", post(send_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn login(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state
        .lifecycle
        .config()
        .get()
        .authenticate(&request.username, &request.password)
        .is_none()
    {
        warn!(user = %request.username, "Login rejected");
        return Err(ApiError::Unauthorized("Invalid credentials"));
    }

    state.prune_sessions();
    let token = uuid::Uuid::new_v4().simple().to_string();
    state.sessions.insert(
        token.clone(),
        Session {
            username: request.username.clone(),
            issued: Instant::now(),
        },
    );
    info!(user = %request.username, "Login");
    Ok(Json(json!({ "token": token })))
}

async fn logout(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> StatusCode {
    if let Some((_, session)) = bearer(&headers).and_then(|token| state.sessions.remove(token)) {
        info!(user = %session.username, "Logout");
    }
    StatusCode::NO_CONTENT
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started.elapsed().as_secs(),
        "servers": state.lifecycle.config().get().servers.len(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ServerView {
    pub name: String,
    /// Engine status, `missing` when no container exists
    pub state: String,
    pub busy: bool,
    pub actions: Vec<Action>,
}

async fn list_servers(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
) -> Result<Json<Vec<ServerView>>, ApiError> {
    let config = state.lifecycle.config().get();
    let Some(spec) = config.users.get(&user.0) else {
        return Ok(Json(Vec::new()));
    };

    let mut views = Vec::new();
    for name in config.servers.keys() {
        if !spec.has_permission(name, permission::CONTAINER_READ) {
            continue;
        }
        let status = match state.lifecycle.runtime().inspect(name).await {
            Ok(Some(snapshot)) => snapshot.status,
            Ok(None) => "missing".to_string(),
            Err(e) => {
                warn!(server = %name, error = %e, "Inspect failed");
                "unknown".to_string()
            }
        };
        views.push(ServerView {
            name: name.clone(),
            state: status,
            busy: state.lifecycle.is_busy(name),
            actions: Action::ALL
                .into_iter()
                .filter(|action| spec.has_permission(name, action.required_permission()))
                .collect(),
        });
    }
    Ok(Json(views))
}

#[derive(Debug, Serialize)]
pub struct ServerDetail {
    pub name: String,
    pub state: String,
    pub running: bool,
    pub busy: bool,
    pub mounts: Vec<MountPoint>,
}

async fn inspect_server(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<ServerDetail>, ApiError> {
    state.require(&user, &name, permission::CONTAINER_READ)?;
    state.configured(&name)?;

    let snapshot = state
        .lifecycle
        .runtime()
        .inspect(&name)
        .await
        .map_err(|e| LifecycleError::runtime("inspect", &name, e))?
        .ok_or_else(|| {
            LifecycleError::runtime("inspect", &name, RuntimeError::NotFound(name.clone()))
        })?;

    Ok(Json(ServerDetail {
        busy: state.lifecycle.is_busy(&name),
        name,
        state: snapshot.status,
        running: snapshot.running,
        mounts: snapshot.mounts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

async fn server_logs(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    state.require(&user, &name, permission::CONTAINER_READ)?;
    state.configured(&name)?;

    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL).min(MAX_LOG_TAIL);
    let lines = state
        .lifecycle
        .runtime()
        .logs(&name, tail)
        .await
        .map_err(|e| LifecycleError::runtime("read logs of", &name, e))?;
    Ok(Json(lines))
}

async fn run_action(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path((name, action)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let action: Action = action
        .parse()
        .map_err(|e: UnknownAction| {
            LifecycleError::InvalidArgument(e.to_string())
        })?;
    state.require(&user, &name, action.required_permission())?;
    state.configured(&name)?;

    info!(user = %user.0, server = %name, action = %action, "Action requested");
    state
        .detached(move |lifecycle, cancel| async move {
            lifecycle.execute_action(&name, action, &cancel).await
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_backups(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    state.require(&user, &name, permission::CONTAINER_READ)?;
    Ok(Json(state.lifecycle.list_backup_generations(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub generation: String,
}

async fn restore(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(request): Json<RestoreRequest>,
) -> Result<StatusCode, ApiError> {
    state.require(&user, &name, permission::CONTAINER_RESTORE)?;

    info!(user = %user.0, server = %name, generation = %request.generation, "Restore requested");
    state
        .detached(move |lifecycle, cancel| async move {
            lifecycle.restore(&name, &request.generation, &cancel).await
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

async fn send_command(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<StatusCode, ApiError> {
    state.require(&user, &name, permission::CONTAINER_WRITE)?;
    state.configured(&name)?;
    if request.command.trim().is_empty() {
        return Err(LifecycleError::InvalidArgument("empty command".to_string()).into());
    }

    info!(user = %user.0, server = %name, "Console command");
    state
        .lifecycle
        .runtime()
        .send_input(&name, &format!("{}\n", request.command))
        .await
        .map_err(|e| LifecycleError::runtime("send input to", &name, e))?;
    Ok(StatusCode::NO_CONTENT)
}
