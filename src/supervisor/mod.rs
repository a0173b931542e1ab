//! Per-instance process supervision
//!
//! Liveness is derived on every call from the workspace PID file and the
//! OS process table; no state is kept between invocations. A PID file that
//! names a dead process is stale and is treated as stopped.
//!
//! Nothing here locks the workspace: a worker started outside this
//! supervisor is only seen if it wrote the PID file.

mod launcher;
mod pidfile;
mod process;

pub use launcher::Launcher;
pub use pidfile::PidFile;
pub use process::{OsProcessTable, ProcessTable};

#[cfg(test)]
pub use process::MockProcessTable;

use crate::error::FleetResult;
use crate::workspace::Workspace;

use std::time::Duration;
use tracing::{debug, info, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Observed state of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Running { pid: u32 },
    /// PID file names a process that no longer exists
    Stale { pid: u32 },
}

impl ProcessState {
    pub fn running_pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    NotRunning,
}

/// Start/stop/status state machine for instances, keyed by their PID file
pub struct Supervisor<T> {
    processes: T,
    launcher: Launcher,
    stop_grace: Duration,
}

impl<T: ProcessTable> Supervisor<T> {
    pub fn new(processes: T, launcher: Launcher, stop_grace: Duration) -> Self {
        Self {
            processes,
            launcher,
            stop_grace,
        }
    }

    fn pid_file(workspace: &Workspace) -> PidFile {
        PidFile::new(workspace.pid_path())
    }

    /// Raw three-way state, distinguishing stale PID files
    pub fn inspect(&self, workspace: &Workspace) -> FleetResult<ProcessState> {
        let state = match Self::pid_file(workspace).read()? {
            None => ProcessState::Stopped,
            Some(pid) if self.processes.is_alive(pid) => ProcessState::Running { pid },
            Some(pid) => ProcessState::Stale { pid },
        };
        Ok(state)
    }

    /// Running or stopped; stale PID files report as stopped
    pub fn status(&self, workspace: &Workspace) -> FleetResult<ProcessState> {
        Ok(match self.inspect(workspace)? {
            ProcessState::Stale { pid } => {
                debug!("Stale PID {} for {}", pid, workspace.id());
                ProcessState::Stopped
            }
            state => state,
        })
    }

    /// Remove the PID file unconditionally
    pub fn clean(&self, workspace: &Workspace) -> FleetResult<()> {
        Self::pid_file(workspace).remove()
    }

    /// Start the worker unless it is already running
    ///
    /// Runs the endpoints refresh first when needed; a failed refresh aborts
    /// before anything is spawned and leaves no PID file behind.
    pub async fn start(&self, workspace: &Workspace, use_proxy: bool) -> FleetResult<StartOutcome> {
        if let ProcessState::Running { pid } = self.status(workspace)? {
            warn!("Relayer for {} is already running (PID {}). Skipping...", workspace.id(), pid);
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        self.clean(workspace)?;
        info!(
            "Starting relayer for {} with config {:?}",
            workspace.id(),
            workspace.config_path()
        );

        if let Err(e) = self.launcher.ensure_endpoints(workspace).await {
            crate::metrics::record_start_failure();
            return Err(e);
        }

        let pid = match self.launcher.spawn_worker(workspace, use_proxy) {
            Ok(pid) => pid,
            Err(e) => {
                crate::metrics::record_start_failure();
                return Err(e);
            }
        };
        Self::pid_file(workspace).write(pid)?;

        crate::metrics::record_instance_started();
        Ok(StartOutcome::Started { pid })
    }

    /// Terminate the worker if it is running; a no-op otherwise
    ///
    /// Waits up to the stop grace period for the process to exit, then
    /// removes the PID file whether or not it has finished draining.
    pub async fn stop(&self, workspace: &Workspace) -> FleetResult<StopOutcome> {
        let pid = match self.status(workspace)? {
            ProcessState::Running { pid } => pid,
            _ => return Ok(StopOutcome::NotRunning),
        };

        info!("Stopping {} ({})", pid, workspace.id());
        self.processes.terminate(pid)?;

        let deadline = tokio::time::Instant::now() + self.stop_grace;
        while self.processes.is_alive(pid) {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "PID {} still running {:?} after SIGTERM; clearing PID file anyway",
                    pid, self.stop_grace
                );
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        self.clean(workspace)?;
        crate::metrics::record_instance_stopped();
        Ok(StopOutcome::Stopped { pid })
    }
}
