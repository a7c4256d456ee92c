//! API Server module
//!
//! This module exposes the core over a JSON HTTP API so any front end can
//! render the entry, discovery and dashboard screens.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::{Core, CoreError, Update};
use crate::dialogue::DialogueError;
use crate::models::{self, TaskId};
use crate::store::StoreError;

/// Request to create a task
#[derive(Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub context: Option<String>,
}

/// Request to quick-add a task
#[derive(Serialize, Deserialize)]
pub struct QuickAddRequest {
    pub title: String,
}

/// Request to answer the current dialogue question
#[derive(Serialize, Deserialize)]
pub struct SelectOptionRequest {
    pub option: String,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        CoreError::Store(StoreError::InvalidInput) => StatusCode::BAD_REQUEST,
        CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Dialogue(DialogueError::UnknownCase(_)) => StatusCode::NOT_FOUND,
        CoreError::Dialogue(DialogueError::UnknownOption(_)) => StatusCode::BAD_REQUEST,
        CoreError::Dialogue(_) => StatusCode::CONFLICT,
        CoreError::NoRuntime => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Helper function to map Core results to Axum responses
fn map_core_result<T: Serialize>(result: Result<T, CoreError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => (status_for(&e), Json(ApiResponse::<T>::error(e.to_string()))).into_response(),
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Builds the application router
pub fn router(core: Core) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // --- Screen state --- //
        .route("/api/state", get(get_state))
        .route("/api/view/dashboard", post(enter_dashboard))
        .route("/api/view/entry", post(show_entry))
        // --- Tasks --- //
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/quick", post(quick_add))
        .route("/api/tasks/:id", delete(delete_task))
        .route("/api/tasks/:id/toggle", post(toggle_task))
        .route("/api/tasks/:id/breakdown", post(breakdown_task))
        // --- Discovery --- //
        .route("/api/catalog", get(list_catalog))
        .route("/api/discovery/start", post(start_discovery))
        .route("/api/discovery/select", post(select_option))
        .route("/api/discovery/action", post(take_action))
        .route("/api/discovery/catalog/:case_id", post(pick_catalog))
        .route("/api/discovery/close", post(close_discovery))
        // --- Updates --- //
        .route("/api/events", get(events_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

/// Starts the API server
pub async fn serve(core: Core, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(core);

    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Screen state --- //

async fn get_state(State(core): State<Core>) -> impl IntoResponse {
    ok(core.snapshot())
}

async fn enter_dashboard(State(core): State<Core>) -> impl IntoResponse {
    core.enter_dashboard();
    ok(core.snapshot())
}

async fn show_entry(State(core): State<Core>) -> impl IntoResponse {
    core.show_entry();
    ok(core.snapshot())
}

// --- Tasks --- //

async fn list_tasks(State(core): State<Core>) -> impl IntoResponse {
    ok(core.tasks())
}

async fn create_task(
    State(core): State<Core>,
    Json(payload): Json<CreateTaskRequest>,
) -> impl IntoResponse {
    map_core_result(core.create_task(&payload.title, payload.context.as_deref()))
}

async fn quick_add(
    State(core): State<Core>,
    Json(payload): Json<QuickAddRequest>,
) -> impl IntoResponse {
    map_core_result(core.quick_add(&payload.title))
}

async fn toggle_task(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    map_core_result(core.toggle_complete(&TaskId::new(id)))
}

async fn delete_task(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    map_core_result(core.delete_task(&TaskId::new(id)))
}

async fn breakdown_task(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    map_core_result(core.breakdown(&TaskId::new(id)).await)
}

// --- Discovery --- //

async fn list_catalog() -> impl IntoResponse {
    ok(models::catalog())
}

async fn start_discovery(State(core): State<Core>) -> impl IntoResponse {
    ok(core.start_discovery())
}

/// Answers the current question. The reply arrives after the thinking delay,
/// so the returned session is in its thinking state.
async fn select_option(
    State(core): State<Core>,
    Json(payload): Json<SelectOptionRequest>,
) -> impl IntoResponse {
    let result = core
        .select_option(&payload.option)
        .map(|_pending| core.session());
    map_core_result(result)
}

async fn take_action(State(core): State<Core>) -> impl IntoResponse {
    map_core_result(core.take_action())
}

async fn pick_catalog(State(core): State<Core>, Path(case_id): Path<u32>) -> impl IntoResponse {
    map_core_result(core.pick_catalog(case_id))
}

async fn close_discovery(State(core): State<Core>) -> impl IntoResponse {
    core.close_discovery();
    ok(core.snapshot())
}

// --- Updates --- //

async fn events_handler(State(core): State<Core>) -> impl IntoResponse {
    let stream = update_stream(core.subscribe());

    // Set headers for event stream
    let headers = [
        (
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        ),
        (
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        ),
    ];

    // Return response with headers and stream body
    (headers, axum::body::Body::from_stream(stream))
}

/// Renders broadcast updates as server-sent events
fn update_stream(
    receiver: tokio::sync::broadcast::Receiver<Update>,
) -> impl Stream<Item = Result<String, Infallible>> {
    stream::unfold(receiver, |mut receiver| async move {
        let event = match receiver.recv().await {
            Ok(update) => render_event(&update),
            // Some messages were missed; the client only needs to refetch
            Err(RecvError::Lagged(_)) => render_event(&Update::Changed),
            Err(RecvError::Closed) => return None,
        };
        Some((Ok(event), receiver))
    })
}

fn render_event(update: &Update) -> String {
    match update {
        Update::Changed => "event: update\ndata: change\n\n".to_string(),
        Update::Celebrate(id) => format!("event: celebrate\ndata: {}\n\n", id),
    }
}
