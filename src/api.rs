//! HTTP control surface.
//!
//! - `PUT /services/start` starts a batch of node jobs
//! - `PUT /services/stop` stops a batch of node jobs
//! - `GET /services/events` streams delivery records as server-sent events
//! - `GET /services/jobs` lists running jobs
//! - `GET /services/nodes` lists stored nodes with their parameter ranges
//! - `GET /services/` and `GET /health` for humans and health checks

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, put},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{SchedulerError, ValidationError};
use crate::events::EventStream;
use crate::job::NodeJobConfig;
use crate::reading::ParamSpec;
use crate::registry::{JobStatus, NodeOutcome, TaskRegistry};
use crate::store::{MemoryNodeStore, ServiceState};

/// Shared state handed to every handler.
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    pub events: EventStream,
    pub nodes: Arc<MemoryNodeStore>,
}

impl AppState {
    pub fn new(
        registry: Arc<TaskRegistry>,
        events: EventStream,
        nodes: Arc<MemoryNodeStore>,
    ) -> Self {
        Self {
            registry,
            events,
            nodes,
        }
    }
}

/// One entry of a start request body.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub node_id: String,
    pub frequency: i64,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub protocol: String,
}

impl TryFrom<StartRequest> for NodeJobConfig {
    type Error = ValidationError;

    fn try_from(req: StartRequest) -> Result<Self, Self::Error> {
        NodeJobConfig::new(
            req.node_id,
            req.frequency,
            req.parameters,
            req.platform,
            req.protocol,
        )
    }
}

/// One entry of a stop request body.
#[derive(Debug, Clone, Deserialize)]
pub struct StopRequest {
    pub node_id: String,
}

/// Per-node result in a batch response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryResult {
    pub node_id: String,
    pub status: String,
    pub code: u16,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<EntryResult>,
}

#[derive(Clone, Copy)]
enum Action {
    Start,
    Stop,
}

impl EntryResult {
    fn from_outcome(outcome: NodeOutcome, action: Action) -> Self {
        match outcome.result {
            Ok(()) => {
                let (status, verb) = match action {
                    Action::Start => ("started", "started"),
                    Action::Stop => ("stopped", "stopped"),
                };
                Self {
                    detail: format!("Task for node_id {} {}.", outcome.node_id, verb),
                    node_id: outcome.node_id,
                    status: status.to_string(),
                    code: 200,
                }
            }
            Err(e) => Self {
                node_id: outcome.node_id,
                status: error_status(&e).to_string(),
                code: e.status_code(),
                detail: e.to_string(),
            },
        }
    }
}

fn error_status(e: &SchedulerError) -> &'static str {
    match e {
        SchedulerError::AlreadyRunning(_) => "already_running",
        SchedulerError::NotRunning(_) => "not_running",
        SchedulerError::UnknownNode(_) => "unknown_node",
        SchedulerError::NoActiveJobs => "no_active_jobs",
        SchedulerError::Validation(_) => "invalid",
    }
}

/// 200 when every entry succeeded, 207 when mixed, otherwise the worst entry code.
fn batch_status(results: &[EntryResult]) -> StatusCode {
    let succeeded = results.iter().filter(|r| r.code == 200).count();
    if succeeded == results.len() {
        return StatusCode::OK;
    }
    if succeeded > 0 {
        return StatusCode::MULTI_STATUS;
    }
    results
        .iter()
        .map(|r| r.code)
        .max()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::BAD_REQUEST)
}

fn batch_response(outcomes: Vec<NodeOutcome>, action: Action) -> Response {
    let results: Vec<EntryResult> = outcomes
        .into_iter()
        .map(|o| EntryResult::from_outcome(o, action))
        .collect();
    let status = batch_status(&results);
    (status, Json(BatchResponse { results })).into_response()
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

/// PUT /services/start
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Vec<StartRequest>>,
) -> Response {
    // Reject the whole batch before touching the registry
    let configs = match body
        .into_iter()
        .map(NodeJobConfig::try_from)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(configs) => configs,
        Err(e) => return detail(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };

    info!(count = configs.len(), "Start requested");
    let outcomes = state.registry.start(configs).await;
    batch_response(outcomes, Action::Start)
}

/// PUT /services/stop
pub async fn stop_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Vec<StopRequest>>,
) -> Response {
    let node_ids: Vec<String> = body.into_iter().map(|r| r.node_id).collect();

    info!(count = node_ids.len(), "Stop requested");
    let outcomes = state.registry.stop(node_ids).await;
    batch_response(outcomes, Action::Stop)
}

/// GET /services/events
pub async fn events_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.events.subscribe() {
        Ok(stream) => {
            info!("Event subscriber connected");
            let stream = stream
                .map(|(_, record)| Event::default().event("delivery").json_data(&record));
            Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => detail(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// GET /services/jobs
pub async fn jobs_handler(State(state): State<Arc<AppState>>) -> Json<Vec<JobStatus>> {
    Json(state.registry.snapshot())
}

/// A stored node with its parameters resolved to start-request ranges.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub vertical: Option<String>,
    pub frequency: i64,
    pub parameters: Vec<ParamSpec>,
    pub platform: String,
    pub protocol: String,
    pub services: ServiceState,
}

/// GET /services/nodes
pub async fn nodes_handler(State(state): State<Arc<AppState>>) -> Json<Vec<NodeSummary>> {
    let nodes = state
        .nodes
        .list()
        .into_iter()
        .map(|node| NodeSummary {
            vertical: state.nodes.vertical(node.vertical_id).map(|v| v.name),
            parameters: state
                .nodes
                .parameters_for(&node)
                .into_iter()
                .map(|p| ParamSpec::new(p.name, p.min_value, p.max_value))
                .collect(),
            node_id: node.node_id,
            frequency: node.frequency,
            platform: node.platform,
            protocol: node.protocol,
            services: node.services,
        })
        .collect();
    Json(nodes)
}

/// GET /services/
pub async fn usage_handler() -> Json<Value> {
    Json(json!({
        "message": "Use PUT /services/start with [{node_id, frequency, parameters, platform, protocol}] \
                    to start nodes, PUT /services/stop with [{node_id}] to stop them, \
                    and GET /services/events to follow deliveries."
    }))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_jobs": state.registry.live_count(),
    }))
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/services/", get(usage_handler))
        .route("/services/start", put(start_handler))
        .route("/services/stop", put(stop_handler))
        .route("/services/events", get(events_handler))
        .route("/services/jobs", get(jobs_handler))
        .route("/services/nodes", get(nodes_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
