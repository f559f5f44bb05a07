//! JSON control routes.
//!
//! Operation outcomes are always `200` with `{success, error?}`; the status
//! code only reports problems with the request itself (bad JSON, unknown
//! path, wrong method).

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use telearm_hal::RobotLink;
use telearm_middleware::EventBus;
use telearm_types::{ArmError, SettingsUpdate};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::ws;

/// The compiled-in teleop page.
pub const COCKPIT_HTML: &str = include_str!("cockpit.html");

/// Shared handler state. Handlers extract the piece they need.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub link: Arc<RobotLink>,
    pub bus: Arc<EventBus>,
    /// Cancelled when the server shuts down; closes open WebSocket sessions.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct JogRequest {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

#[derive(Debug, Deserialize)]
pub struct GripperRequest {
    action: String,
}

/// Build the cockpit router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/ws", get(ws::upgrade))
        .route("/connect", api(post(connect)))
        .route("/jog", api(post(jog)))
        .route("/stop", api(post(stop)))
        .route("/gripper", api(post(gripper)))
        .route("/reset_error", api(post(reset_error)))
        .route("/settings", api(get(settings).post(update_settings)))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer unsupported methods on an API path with a JSON `405`.
fn api(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.fallback(method_not_allowed)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index() -> Html<&'static str> {
    Html(COCKPIT_HTML)
}

async fn connect(State(link): State<Arc<RobotLink>>) -> Json<Value> {
    outcome(link.connect().await)
}

async fn jog(
    State(link): State<Arc<RobotLink>>,
    body: Result<Json<JogRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => outcome(link.jog(req.x, req.y, req.z).await).into_response(),
        Err(rejection) => rejected(rejection),
    }
}

async fn stop(State(link): State<Arc<RobotLink>>) -> Json<Value> {
    outcome(link.stop().await)
}

async fn gripper(
    State(link): State<Arc<RobotLink>>,
    body: Result<Json<GripperRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => outcome(link.gripper(&req.action).await).into_response(),
        Err(rejection) => rejected(rejection),
    }
}

async fn reset_error(State(link): State<Arc<RobotLink>>) -> Json<Value> {
    outcome(link.reset_error().await)
}

async fn settings(State(link): State<Arc<RobotLink>>) -> Json<Value> {
    let settings = link.settings();
    Json(json!({
        "success": true,
        "velocity_timeout": settings.velocity_timeout,
        "jog_velocity": settings.jog_velocity,
    }))
}

async fn update_settings(
    State(link): State<Arc<RobotLink>>,
    body: Result<Json<SettingsUpdate>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(update)) => outcome(link.update_settings(update).await).into_response(),
        Err(rejection) => rejected(rejection),
    }
}

async fn not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "not found")
}

async fn method_not_allowed() -> Response {
    failure(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

fn outcome(result: Result<(), ArmError>) -> Json<Value> {
    match result {
        Ok(()) => Json(json!({ "success": true })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

fn rejected(rejection: JsonRejection) -> Response {
    failure(rejection.status(), &rejection.body_text())
}

fn failure(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}
