//! HTTP API for daemon health and fleet status

use crate::config::ApiConfig;
use crate::daemon::{DaemonStatus, TaskStats};
use crate::error::{FleetError, FleetResult};
use crate::fleet::{Fleet, RunningInstance};
use crate::ports::PortProbe;
use crate::supervisor::ProcessTable;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Source of the running-instance list served at `/instances`
pub trait InstanceSource: Send + Sync {
    fn running(&self) -> FleetResult<Vec<RunningInstance>>;
}

impl<P: PortProbe, T: ProcessTable> InstanceSource for Fleet<P, T> {
    fn running(&self) -> FleetResult<Vec<RunningInstance>> {
        self.show()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub daemon: String,
    pub instances: Arc<dyn InstanceSource>,
    pub status: DaemonStatus,
    pub started_at: DateTime<Utc>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/instances", get(get_instances))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> FleetResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FleetError::io(format!("Failed to bind API server on {}", addr), e))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| FleetError::io("API server failed", e))?;

    Ok(())
}

/// Health check endpoint - liveness plus daemon task counters
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = Utc::now() - state.started_at;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        daemon: state.daemon.clone(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        tasks: state.status.snapshot(),
    })
}

/// Running relayer instances
async fn get_instances(State(state): State<AppState>) -> impl IntoResponse {
    match state.instances.running() {
        Ok(instances) => (
            StatusCode::OK,
            Json(InstancesResponse {
                count: instances.len(),
                instances,
                error: None,
            }),
        ),
        Err(e) => {
            error!("Failed to list instances: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InstancesResponse {
                    count: 0,
                    instances: Vec::new(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    daemon: String,
    uptime_seconds: u64,
    tasks: BTreeMap<String, TaskStats>,
}

#[derive(Serialize)]
struct InstancesResponse {
    count: usize,
    instances: Vec<RunningInstance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}
