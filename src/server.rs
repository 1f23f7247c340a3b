//! HTTP and WebSocket surface of the control plane.
//!
//! Malformed requests are answered with a 4xx status and a JSON error body;
//! nothing a client sends can stop the server.

use crate::app::{AppError, Application, RunMode, RunResponse};
use crate::error::SyncError;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const WS_GET_JOB_LIST: &str = "getJobList";
pub const WS_START_JOB: &str = "startJob";
pub const WS_STOP_JOB: &str = "stopJob";

/// Build the router.
pub fn router(app: Arc<Application>) -> Router {
    Router::new()
        .route("/run", get(run_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/:name/report", get(last_report_handler))
        .route("/jobs/:name/start", post(start_job_handler))
        .route("/jobs/:name/stop", post(stop_job_handler))
        .route("/ws", get(ws_handler))
        .with_state(app)
}

/// Serve the control plane until Ctrl-C.
pub async fn serve(app: Arc<Application>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control plane listening on {}", addr);
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down control plane");
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        let status = match &e {
            AppError::UnknownJob(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyRunning(_) | AppError::NotRunning(_) => StatusCode::CONFLICT,
            AppError::OngoingSimulation(_) | AppError::InvalidMode(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidInterval { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Sync(SyncError::Configuration(_) | SyncError::Parse { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Sync(SyncError::Store(_)) => StatusCode::BAD_GATEWAY,
            AppError::Sync(SyncError::ReportSerialization(_) | SyncError::Task(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("Request failed ({}): {}", self.status, self.message);
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

fn json_bytes(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Parse a boolean the way query strings usually spell it.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

// ============================================================================
// HTTP handlers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    #[serde(rename = "type")]
    pub mode: Option<String>,
    pub run: Option<String>,
    pub simulation: Option<String>,
}

async fn run_handler(
    State(app): State<Arc<Application>>,
    Query(params): Query<RunParams>,
) -> Result<Response, ApiError> {
    let mode = match params.mode.as_deref().map(str::trim) {
        Some(mode) if !mode.is_empty() => mode.parse::<RunMode>()?,
        _ => return Err(ApiError::bad_request("URL param 'type' is missing")),
    };
    let name = match params.run.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(ApiError::bad_request("URL param 'run' is missing")),
    };
    let simulation = match params.simulation.as_deref() {
        None => None,
        Some(value) => Some(parse_bool(value).ok_or_else(|| {
            ApiError::bad_request(format!("wrong 'simulation' URL param value '{value}'"))
        })?),
    };

    debug!("Run request: job={name} mode={mode} simulation={simulation:?}");
    match app.run(&name, mode, simulation).await? {
        RunResponse::Report(report) => Ok(json_bytes(StatusCode::OK, report)),
        RunResponse::Started(message) => {
            Ok((StatusCode::ACCEPTED, Json(MessageBody { message })).into_response())
        }
    }
}

async fn list_jobs_handler(State(app): State<Arc<Application>>) -> Response {
    Json(app.list_jobs()).into_response()
}

async fn last_report_handler(
    State(app): State<Arc<Application>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    app.job(&name)?;
    match app.last_report(&name) {
        Some(report) => Ok(json_bytes(StatusCode::OK, report)),
        None => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("job '{name}' has not run yet"),
        }),
    }
}

async fn start_job_handler(
    State(app): State<Arc<Application>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let message = app.start_job(&name)?;
    Ok((StatusCode::ACCEPTED, Json(MessageBody { message })).into_response())
}

async fn stop_job_handler(
    State(app): State<Arc<Application>>,
    Path(name): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    let message = app.stop_job(&name)?;
    Ok(Json(MessageBody { message }))
}

// ============================================================================
// WebSocket
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsInbound {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data: WsInboundData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsInboundData {
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsOutbound {
    pub id: String,
    pub name: String,
    pub success: bool,
    pub data: WsOutboundData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsOutboundData {
    pub message: String,
    pub payload: String,
}

impl WsOutbound {
    fn reply(request: &WsInbound, name: &str, result: Result<(String, String), String>) -> Self {
        let (success, message, payload) = match result {
            Ok((message, payload)) => (true, message, payload),
            Err(message) => (false, message, String::new()),
        };
        Self {
            id: request.id.clone(),
            name: name.to_string(),
            success,
            data: WsOutboundData { message, payload },
        }
    }
}

/// Answer one WebSocket request.
pub fn handle_ws_request(app: &Application, request: &WsInbound) -> WsOutbound {
    match request.name.as_str() {
        WS_GET_JOB_LIST => {
            let result = app
                .list_jobs_json()
                .map(|jobs| (String::new(), String::from_utf8_lossy(&jobs).into_owned()))
                .map_err(|e| e.to_string());
            WsOutbound::reply(request, "jobListFetched", result)
        }
        WS_START_JOB => {
            let result = app
                .start_job(&request.data.payload)
                .map(|message| (message, String::new()))
                .map_err(|e| e.to_string());
            WsOutbound::reply(request, "jobStarted", result)
        }
        WS_STOP_JOB => {
            let result = app
                .stop_job(&request.data.payload)
                .map(|message| (message, String::new()))
                .map_err(|e| e.to_string());
            WsOutbound::reply(request, "jobStopped", result)
        }
        other => WsOutbound::reply(
            request,
            "unknownRequest",
            Err(format!("Unknown websocket request name \"{other}\".")),
        ),
    }
}

/// Answer one raw WebSocket text frame.
pub fn handle_ws_text(app: &Application, text: &str) -> WsOutbound {
    match serde_json::from_str::<WsInbound>(text) {
        Ok(request) => handle_ws_request(app, &request),
        Err(e) => WsOutbound {
            name: "invalidRequest".to_string(),
            data: WsOutboundData {
                message: format!("Malformed websocket request: {e}"),
                payload: String::new(),
            },
            ..Default::default()
        },
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(app): State<Arc<Application>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(mut socket: WebSocket, app: Arc<Application>) {
    info!("WebSocket client connected");
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("WebSocket receive failed: {e}");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = handle_ws_text(&app, &text);
        let reply = match serde_json::to_string(&reply) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to serialize websocket reply: {e}");
                continue;
            }
        };
        if let Err(e) = socket.send(Message::Text(reply)).await {
            debug!("WebSocket send failed: {e}");
            break;
        }
    }
    info!("WebSocket client disconnected");
}
