//! Casita Sim - simulated smart home API server

use automation_engine::UpdateAutomationRequest;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State, WebSocketUpgrade},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usage_log::LogStore;

mod auth;
mod config;
mod sessions;
mod websocket;

use auth::{normalize_username, AuthError, CredentialStore};
use config::Config;
use sessions::{LiveSession, SessionManager};

/// Rows returned by the log endpoint when `n` is not given
const DEFAULT_LOG_ROWS: usize = 10;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<CredentialStore>,
    pub sessions: Arc<SessionManager>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Handler errors, rendered as an `ApiResponse` with a status code
#[derive(Debug)]
enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ApiResponse::error(msg))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingField | AuthError::InvalidUsername => {
                ApiError::BadRequest(err.to_string())
            }
            other => {
                tracing::error!("Credential store failure: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<automation_engine::AutomationError> for ApiError {
    fn from(err: automation_engine::AutomationError) -> Self {
        ApiError::NotFound(err.to_string())
    }
}

type ApiResult = Result<Json<ApiResponse>, ApiError>;

/// The caller's session, resolved from `Authorization: Bearer <token>`
struct CurrentSession {
    token: String,
    username: String,
    live: Arc<LiveSession>,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        let (username, live) = state
            .sessions
            .resolve(token)
            .ok_or_else(|| ApiError::Unauthorized("Session expired, please log in".to_string()))?;

        Ok(Self {
            token: token.to_string(),
            username,
            live,
        })
    }
}

/// System info response
#[derive(Serialize)]
struct SystemInfo {
    name: String,
    version: String,
    users: usize,
    active_sessions: usize,
}

/// Signup and login body
#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

/// Issued session token
#[derive(Serialize)]
struct LoginResponse {
    token: String,
    username: String,
}

/// Text command body
#[derive(Deserialize)]
struct CommandRequest {
    text: String,
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default)]
    n: Option<usize>,
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Get system info
async fn system_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(SystemInfo {
        name: "Casita Sim".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        users: state.users.len(),
        active_sessions: state.sessions.active_sessions(),
    }))
}

/// Create an account and log in
async fn signup(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    if !state.users.create(&req.username, &req.password).await? {
        return Err(ApiError::Conflict("Username already exists.".to_string()));
    }

    let username = normalize_username(&req.username);
    let token = state.sessions.open(&username);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(LoginResponse { token, username })),
    ))
}

/// Log in with existing credentials
async fn login(State(state): State<AppState>, Json(req): Json<Credentials>) -> ApiResult {
    if !state.users.validate(&req.username, &req.password).await {
        tracing::info!("Rejected login for {:?}", req.username.trim());
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let username = normalize_username(&req.username);
    let token = state.sessions.open(&username);
    Ok(Json(ApiResponse::success(LoginResponse { token, username })))
}

/// Revoke the caller's token
async fn logout(State(state): State<AppState>, current: CurrentSession) -> ApiResult {
    state.sessions.close(&current.token);
    Ok(Json(ApiResponse::success(serde_json::json!({
        "username": current.username
    }))))
}

/// Current state without running a tick
async fn session_state(current: CurrentSession) -> ApiResult {
    let snapshot = current.live.lock().await.snapshot();
    Ok(Json(ApiResponse::success(snapshot)))
}

/// Run one tick now
async fn tick(current: CurrentSession) -> ApiResult {
    let report = current.live.tick(None).await;
    Ok(Json(ApiResponse::success(report)))
}

/// Run one tick with a text command
async fn command(current: CurrentSession, Json(req): Json<CommandRequest>) -> ApiResult {
    let report = current.live.tick(Some(&req.text)).await;
    Ok(Json(ApiResponse::success(report)))
}

/// Turn device on
async fn device_on(current: CurrentSession, Path(device): Path<String>) -> ApiResult {
    let device = current.live.lock().await.set_device_by_name(&device, true)?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "action": "on",
        "device": device
    }))))
}

/// Turn device off
async fn device_off(current: CurrentSession, Path(device): Path<String>) -> ApiResult {
    let device = current.live.lock().await.set_device_by_name(&device, false)?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "action": "off",
        "device": device
    }))))
}

/// Toggle device on/off
async fn device_toggle(current: CurrentSession, Path(device): Path<String>) -> ApiResult {
    let (device, on) = current.live.lock().await.toggle_device_by_name(&device)?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "action": "toggle",
        "device": device,
        "on": on
    }))))
}

/// Get automation settings
async fn get_automation(current: CurrentSession) -> ApiResult {
    let config = current.live.lock().await.automation().clone();
    Ok(Json(ApiResponse::success(config)))
}

/// Update automation settings (threshold is clamped, never rejected)
async fn put_automation(
    current: CurrentSession,
    Json(req): Json<UpdateAutomationRequest>,
) -> ApiResult {
    let config = current.live.lock().await.configure_automation(req).clone();
    Ok(Json(ApiResponse::success(config)))
}

/// Most recent log rows
async fn logs(current: CurrentSession, Query(query): Query<LogsQuery>) -> ApiResult {
    let n = query.n.unwrap_or(DEFAULT_LOG_ROWS);
    let rows = current.live.lock().await.recent_logs(n).await;
    Ok(Json(ApiResponse::success(rows)))
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let (username, live) = state
        .sessions
        .resolve(&query.token)
        .ok_or_else(|| ApiError::Unauthorized("Session expired, please log in".to_string()))?;
    Ok(ws.on_upgrade(move |socket| websocket::handle_socket(socket, username, live)))
}

/// Build the router
fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/system/info", get(system_info))
        .route("/api/v1/auth/signup", post(signup))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/state", get(session_state))
        .route("/api/v1/tick", post(tick))
        .route("/api/v1/command", post(command))
        .route("/api/v1/devices/:device/on", post(device_on))
        .route("/api/v1/devices/:device/off", post(device_off))
        .route("/api/v1/devices/:device/toggle", post(device_toggle))
        .route("/api/v1/automation", get(get_automation).put(put_automation))
        .route("/api/v1/logs", get(logs))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "casita_sim_api=debug,automation_engine=debug,usage_log=debug,info".into()
        }))
        .init();

    tracing::info!("Starting Casita Sim API server");

    let config = Config::from_env();
    tracing::info!(
        "Data directory {:?}, tick every {:?}, {:?} simulation in [{}, {}]°C",
        config.data_dir,
        config.tick_interval,
        config.simulation.policy,
        config.simulation.min_temp,
        config.simulation.max_temp
    );

    let users = CredentialStore::load(config.users_path()).await;
    let store = Arc::new(LogStore::with_cache_ttl(config.log_dir(), config.log_cache_ttl));
    let sessions = SessionManager::new(store, config.simulation.clone(), config.tick_interval);

    let state = AppState {
        users: Arc::new(users),
        sessions: Arc::new(sessions),
    };

    // Start server
    tracing::info!("Listening on http://{}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::{Stream, StreamExt};
    use home_core::SimulationConfig;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_tungstenite::tungstenite::Message;
    use tower::ServiceExt;

    async fn test_app(dir: &TempDir) -> Router {
        let users = CredentialStore::load(dir.path().join("users.csv")).await;
        let store = Arc::new(LogStore::new(dir.path().join("logs")));
        let sessions =
            SessionManager::new(store, SimulationConfig::default(), Duration::from_secs(3600));
        app(AppState {
            users: Arc::new(users),
            sessions: Arc::new(sessions),
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn signup(app: &Router, username: &str) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/auth/signup",
            None,
            Some(serde_json::json!({ "username": username, "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_signup_login_logout() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir).await;
        signup(&app, "Alice").await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/signup",
            None,
            Some(serde_json::json!({ "username": "alice", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(serde_json::json!({ "username": "alice", "password": "bad" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(serde_json::json!({ "username": " ALICE ", "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "alice");
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "POST", "/api/v1/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", "/api/v1/state", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_requires_token() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir).await;
        let (status, body) = call(&app, "POST", "/api/v1/tick", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_command_tick() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir).await;
        let token = signup(&app, "bob").await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/command",
            Some(&token),
            Some(serde_json::json!({ "text": "turn on fan status" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let report = &body["data"];
        assert_eq!(report["devices"]["Fan"], true);
        assert_eq!(report["logged"], true);
        assert_eq!(report["recent_logs"].as_array().unwrap().len(), 1);
        let actions = report["command_actions"].as_array().unwrap();
        assert_eq!(actions[0]["type"], "switched");
        assert_eq!(actions.last().unwrap()["type"], "status");
    }

    #[tokio::test]
    async fn test_device_and_automation_endpoints() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir).await;
        let token = signup(&app, "carol").await;

        let (status, body) =
            call(&app, "POST", "/api/v1/devices/tv/toggle", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["device"], "TV");
        assert_eq!(body["data"]["on"], true);

        let (status, _) =
            call(&app, "POST", "/api/v1/devices/heater/on", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            "PUT",
            "/api/v1/automation",
            Some(&token),
            Some(serde_json::json!({ "room_auto": false, "temp_threshold_ac": 99 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["room_auto"], false);
        assert_eq!(body["data"]["temp_threshold_ac"], 45);

        let (_, body) = call(&app, "GET", "/api/v1/state", Some(&token), None).await;
        assert_eq!(body["data"]["devices"]["TV"], true);
        assert_eq!(body["data"]["automation"]["temp_threshold_ac"], 45);
    }

    async fn next_json<S>(socket: &mut S) -> serde_json::Value
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(10), socket.next())
                .await
                .expect("websocket event")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_streams_ticks() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir).await;
        let token = signup(&app, "erin").await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_app = app.clone();
        let server = tokio::spawn(async move { axum::serve(listener, server_app).await });

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token={token}"))
                .await
                .unwrap();

        let connected = next_json(&mut socket).await;
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["username"], "erin");

        let (status, body) = call(&app, "POST", "/api/v1/tick", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let tick = next_json(&mut socket).await;
        assert_eq!(tick["type"], "tick");
        assert_eq!(tick["report"]["temperature"], body["data"]["temperature"]);
        assert_eq!(tick["report"]["logged"], true);

        server.abort();
    }

    #[tokio::test]
    async fn test_logs_endpoint() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir).await;
        let token = signup(&app, "dave").await;

        let (_, body) = call(&app, "GET", "/api/v1/logs", Some(&token), None).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        call(&app, "POST", "/api/v1/tick", Some(&token), None).await;
        call(&app, "POST", "/api/v1/tick", Some(&token), None).await;

        let (_, body) = call(&app, "GET", "/api/v1/logs?n=5", Some(&token), None).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["Time"].is_string());
        assert!(rows[0]["Total Power"].is_number());
    }
}
