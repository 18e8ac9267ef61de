//! Admin dashboard HTTP API.
//!
//! A thin JSON layer over [`Coordinator`]. Every `/api/*` route except
//! `/api/login` needs an [`AdminSession`], which is re-validated against
//! the store on every request so an expired session stops working
//! immediately.
//!
//! Errors come back as `{"success": false, "error": <kind>, "message": <text>}`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::moderation::types::{
    BroadcastReport, Page, RecentActivity, Startup, Stats, StatusFilter, User,
};
use crate::moderation::{Coordinator, ModerationError};

const SESSION_COOKIE: &str = "session_id";

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            started_at: Instant::now(),
        }
    }
}

/// Build the dashboard router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/stats", get(stats))
        .route("/api/recent", get(recent))
        .route("/api/startups", get(list_startups))
        .route("/api/startup/{id}", get(get_startup))
        .route("/api/startup/{id}/approve", post(approve_startup))
        .route("/api/startup/{id}/reject", post(reject_startup))
        .route("/api/users", get(list_users))
        .route("/api/broadcast", post(broadcast))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true),
        )
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Dashboard listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            message: message.into(),
        }
    }
}

impl From<ModerationError> for ApiError {
    fn from(err: ModerationError) -> Self {
        let status = match &err {
            ModerationError::Validation(_) => StatusCode::BAD_REQUEST,
            ModerationError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ModerationError::InvalidState(_) | ModerationError::AlreadyPending => StatusCode::CONFLICT,
            ModerationError::NotFound(_) => StatusCode::NOT_FOUND,
            ModerationError::Store(e) => {
                tracing::error!(error = %e, "Dashboard request failed in store");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.kind,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<Success<T>>, ApiError>;

#[derive(Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn ok<T: Serialize>(body: T) -> ApiResult<T> {
    Ok(Json(Success {
        success: true,
        body,
    }))
}

// ─── Session extractor ───────────────────────────────────────────────────────

/// A validated dashboard session.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user_id: i64,
    pub token: String,
}

impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthenticated("login required"))?;
        match state.coordinator.authenticate(&token) {
            Ok(user_id) => Ok(AdminSession { user_id, token }),
            Err(ModerationError::Unauthorized(msg)) => Err(ApiError::unauthenticated(msg)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Session token from the `session_id` cookie, or a Bearer header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string());
    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(|t| t.trim().to_string())
    })
    .filter(|t| !t.is_empty())
}

// ─── Request/Response Types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoginRequest {
    user_id: i64,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StartupsQuery {
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    message: String,
}

#[derive(Serialize)]
struct StartupDetail {
    #[serde(flatten)]
    startup: Startup,
    member_count: i64,
}

#[derive(Serialize)]
struct StartupEnvelope {
    startup: Startup,
}

#[derive(Serialize)]
struct SessionEnvelope {
    session_id: String,
}

#[derive(Serialize)]
struct Empty {}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginRequest>) -> Response {
    match state.coordinator.login(req.user_id, req.token.as_deref()) {
        Ok(session_id) => {
            let max_age = state.coordinator.config().session_ttl.as_secs();
            let cookie =
                format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
            tracing::info!(user_id = req.user_id, "Dashboard login");
            (
                [(header::SET_COOKIE, cookie)],
                ok(SessionEnvelope { session_id }),
            )
                .into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn logout(State(state): State<Arc<AppState>>, session: AdminSession) -> Response {
    if let Err(e) = state.coordinator.logout(&session.token) {
        return ApiError::from(e).into_response();
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    ([(header::SET_COOKIE, cookie)], ok(Empty {})).into_response()
}

async fn stats(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> ApiResult<Stats> {
    ok(state.coordinator.statistics()?)
}

async fn recent(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(q): Query<RecentQuery>,
) -> ApiResult<RecentActivity> {
    ok(state.coordinator.recent_activity(q.limit.unwrap_or(5))?)
}

async fn list_startups(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(q): Query<StartupsQuery>,
) -> ApiResult<Page<Startup>> {
    let filter: StatusFilter = q
        .status
        .as_deref()
        .unwrap_or("all")
        .parse()
        .map_err(ModerationError::Validation)?;
    ok(state
        .coordinator
        .list_startups(filter, q.page.unwrap_or(1), q.per_page.unwrap_or(10))?)
}

async fn get_startup(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> ApiResult<StartupDetail> {
    let startup = state.coordinator.startup(id)?;
    let member_count = state.coordinator.member_count(id)?;
    ok(StartupDetail {
        startup,
        member_count,
    })
}

async fn approve_startup(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
    Path(id): Path<i64>,
) -> ApiResult<StartupEnvelope> {
    let startup = state.coordinator.approve(id, session.user_id).await?;
    ok(StartupEnvelope { startup })
}

async fn reject_startup(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
    Path(id): Path<i64>,
) -> ApiResult<StartupEnvelope> {
    let startup = state.coordinator.reject(id, session.user_id).await?;
    ok(StartupEnvelope { startup })
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Query(q): Query<PageQuery>,
) -> ApiResult<Page<User>> {
    ok(state
        .coordinator
        .list_users(q.page.unwrap_or(1), q.per_page.unwrap_or(20))?)
}

async fn broadcast(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<BroadcastReport> {
    ok(state.coordinator.broadcast(&req.message, session.user_id).await?)
}
