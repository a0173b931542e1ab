//! Daemon supervisor
//!
//! A daemon runs one task forever: run it to completion, sleep for the task
//! interval, repeat. The loop lives in its own tokio task so a panic inside
//! the task body only kills the loop; a monitor checks the loop on a short
//! fixed interval and restarts it with exponential backoff. Runs of one task
//! never overlap because the loop awaits each run before sleeping.

mod tasks;

pub use tasks::{ChannelsTask, CommandTask, FleetRestartTask, ProxyTask};

use crate::config::DaemonConfig;
use crate::error::FleetResult;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Unit of work repeated by a daemon
#[async_trait]
pub trait DaemonTask: Send + Sync + 'static {
    /// Name used in logs, metrics and the status API
    fn name(&self) -> &str;

    async fn run_once(&self) -> FleetResult<()>;
}

/// Counters for one daemon task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Completed runs, successful or not
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    /// Loop restarts after a crash
    pub restarts: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Task counters shared between loops, monitors and the status API
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    tasks: Arc<DashMap<String, TaskStats>>,
}

impl DaemonStatus {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, task: &str) -> Option<TaskStats> {
        self.tasks.get(task).map(|stats| stats.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, TaskStats> {
        self.tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn successes(&self, task: &str) -> u64 {
        self.tasks.get(task).map(|stats| stats.successes).unwrap_or(0)
    }

    fn record_success(&self, task: &str) {
        let mut stats = self.tasks.entry(task.to_string()).or_default();
        stats.runs += 1;
        stats.successes += 1;
        stats.last_success = Some(Utc::now());
    }

    fn record_failure(&self, task: &str, error: String) {
        let mut stats = self.tasks.entry(task.to_string()).or_default();
        stats.runs += 1;
        stats.failures += 1;
        stats.last_error = Some(error);
    }

    fn record_restart(&self, task: &str) {
        self.tasks.entry(task.to_string()).or_default().restarts += 1;
    }
}

/// Scheduling parameters of one daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonTimings {
    /// Pause between the end of one run and the start of the next
    pub interval: Duration,
    /// How often the monitor checks that the loop is alive
    pub monitor_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl DaemonTimings {
    pub fn from_config(config: &DaemonConfig, interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            monitor_interval: Duration::from_secs(config.monitor_interval_secs),
            backoff_initial: Duration::from_secs(config.restart_backoff_initial_secs),
            backoff_max: Duration::from_secs(config.restart_backoff_max_secs),
        }
    }
}

/// Doubling restart delay, capped at `max`
struct Backoff {
    builder: ExponentialBuilder,
    delays: ExponentialBackoff,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(initial.min(max))
            .with_max_delay(max)
            .with_factor(2.0)
            .without_max_times();
        Self {
            delays: builder.clone().build(),
            builder,
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        self.delays.next().unwrap_or(self.max)
    }

    fn reset(&mut self) {
        self.delays = self.builder.clone().build();
    }
}

pub struct Daemon {
    task: Arc<dyn DaemonTask>,
    timings: DaemonTimings,
    status: DaemonStatus,
}

impl Daemon {
    pub fn new(task: Arc<dyn DaemonTask>, timings: DaemonTimings, status: DaemonStatus) -> Self {
        Self {
            task,
            timings,
            status,
        }
    }

    fn spawn_loop(&self) -> JoinHandle<()> {
        tokio::spawn(run_loop(
            self.task.clone(),
            self.timings.interval,
            self.status.clone(),
        ))
    }

    /// Supervise the task loop until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let name = self.task.name().to_string();
        info!(
            "Daemon {} started, running every {:?}",
            name, self.timings.interval
        );

        let mut backoff = Backoff::new(self.timings.backoff_initial, self.timings.backoff_max);
        let mut successes_at_spawn = self.status.successes(&name);
        let mut handle = self.spawn_loop();

        let mut monitor = interval(self.timings.monitor_interval);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = monitor.tick() => {}
            }

            if !handle.is_finished() {
                continue;
            }

            match (&mut handle).await {
                Ok(()) => warn!("Daemon loop {} exited", name),
                Err(e) if e.is_panic() => error!("Daemon loop {} crashed: {}", name, e),
                Err(e) => warn!("Daemon loop {} ended: {}", name, e),
            }

            if self.status.successes(&name) > successes_at_spawn {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            info!("Restarting daemon loop {} in {:?}", name, delay);

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Daemon {} stopped", name);
                    return;
                }
                _ = sleep(delay) => {}
            }

            self.status.record_restart(&name);
            crate::metrics::record_loop_restart(&name);
            successes_at_spawn = self.status.successes(&name);
            handle = self.spawn_loop();
        }

        handle.abort();
        info!("Daemon {} stopped", name);
    }
}

/// Run the task, wait, repeat
///
/// Errors returned by the task are logged and counted; the loop carries on
/// to the next round. Only a panic ends the loop.
async fn run_loop(task: Arc<dyn DaemonTask>, period: Duration, status: DaemonStatus) {
    let name = task.name().to_string();

    loop {
        info!("Running {}", name);
        match task.run_once().await {
            Ok(()) => {
                status.record_success(&name);
                crate::metrics::record_task_run(&name);
            }
            Err(e) => {
                error!("Task {} failed: {}", name, e);
                status.record_failure(&name, e.to_string());
                crate::metrics::record_task_run(&name);
                crate::metrics::record_task_failure(&name);
            }
        }

        debug!("Waiting {:?} for next round of {}", period, name);
        sleep(period).await;
    }
}
