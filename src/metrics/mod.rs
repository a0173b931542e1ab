//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Instance starts, stops and start failures
//! - Running instance count as last observed by `show`
//! - Port allocation
//! - Daemon task runs, failures and loop restarts

use crate::error::{FleetError, FleetResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Instance metrics
    pub static ref INSTANCES_STARTED: IntCounter = register_int_counter!(
        "relayer_fleet_instances_started_total",
        "Total relayer instances started"
    ).unwrap();

    pub static ref INSTANCES_STOPPED: IntCounter = register_int_counter!(
        "relayer_fleet_instances_stopped_total",
        "Total relayer instances stopped"
    ).unwrap();

    pub static ref START_FAILURES: IntCounter = register_int_counter!(
        "relayer_fleet_start_failures_total",
        "Total instance starts aborted by a failed refresh or spawn"
    ).unwrap();

    pub static ref RUNNING_INSTANCES: IntGauge = register_int_gauge!(
        "relayer_fleet_running_instances",
        "Running instances at the last status check"
    ).unwrap();

    // Port metrics
    pub static ref PORTS_ALLOCATED: IntCounter = register_int_counter!(
        "relayer_fleet_port_pairs_allocated_total",
        "Total REST/telemetry port pairs allocated"
    ).unwrap();

    // Daemon metrics
    pub static ref DAEMON_TASK_RUNS: IntCounterVec = register_int_counter_vec!(
        "relayer_fleet_daemon_task_runs_total",
        "Total completed daemon task runs",
        &["task"]
    ).unwrap();

    pub static ref DAEMON_TASK_FAILURES: IntCounterVec = register_int_counter_vec!(
        "relayer_fleet_daemon_task_failures_total",
        "Total daemon task runs that returned an error",
        &["task"]
    ).unwrap();

    pub static ref DAEMON_LOOP_RESTARTS: IntCounterVec = register_int_counter_vec!(
        "relayer_fleet_daemon_loop_restarts_total",
        "Total daemon loop restarts after a crash",
        &["task"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> FleetResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| FleetError::io(format!("Failed to bind metrics server on {}", addr), e))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| FleetError::io("Metrics server failed", e))?;

        Ok(())
    }
}

async fn metrics_handler() -> (StatusCode, String) {
    match render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Text exposition of every registered metric
pub fn render() -> FleetResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| FleetError::Internal(format!("Metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| FleetError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

// Helper functions to record metrics

pub fn record_instance_started() {
    INSTANCES_STARTED.inc();
}

pub fn record_instance_stopped() {
    INSTANCES_STOPPED.inc();
}

pub fn record_start_failure() {
    START_FAILURES.inc();
}

pub fn record_running_instances(count: usize) {
    RUNNING_INSTANCES.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn record_ports_allocated() {
    PORTS_ALLOCATED.inc();
}

pub fn record_task_run(task: &str) {
    DAEMON_TASK_RUNS.with_label_values(&[task]).inc();
}

pub fn record_task_failure(task: &str) {
    DAEMON_TASK_FAILURES.with_label_values(&[task]).inc();
}

pub fn record_loop_restart(task: &str) {
    DAEMON_LOOP_RESTARTS.with_label_values(&[task]).inc();
}
