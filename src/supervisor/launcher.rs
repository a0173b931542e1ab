//! Relayer process launching
//!
//! Two external invocations of the relayer binary:
//! - `<binary> --config <cfg> config endpoints`: one-shot endpoint refresh,
//!   awaited to completion before the worker is started
//! - `<binary> --config <cfg> start`: the long-running worker, optionally
//!   wrapped by the proxy launcher, detached from this process

use crate::config::RelayerConfig;
use crate::error::{FleetError, FleetResult};
use crate::workspace::{Workspace, FRESHNESS_SENTINEL};

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct Launcher {
    binary: PathBuf,
    proxy_launcher: String,
    refresh_timeout: Option<Duration>,
}

impl Launcher {
    pub fn new(config: &RelayerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            proxy_launcher: config.proxy_launcher.clone(),
            refresh_timeout: config.refresh_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Whether the endpoints refresh has already completed for this workspace
    pub fn endpoints_fresh(&self, workspace: &Workspace) -> bool {
        std::fs::read_to_string(workspace.freshness_marker_path())
            .map(|contents| contents.trim() == FRESHNESS_SENTINEL)
            .unwrap_or(false)
    }

    /// Run the endpoints refresh if the freshness marker is missing or stale
    ///
    /// Waits for the refresh to exit. Without a configured timeout the wait
    /// is unbounded; on timeout the refresh is killed and `Timeout` returned.
    pub async fn ensure_endpoints(&self, workspace: &Workspace) -> FleetResult<()> {
        if self.endpoints_fresh(workspace) {
            debug!("Endpoints already updated for {}", workspace.id());
            return Ok(());
        }

        info!("Updating endpoints...");
        let log = open_log(&workspace.refresh_log_path(), false)?;
        let mut child = Command::new(&self.binary)
            .arg("--config")
            .arg(workspace.config_path())
            .args(["config", "endpoints"])
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(clone_log(&log, workspace)?)
            .stderr(log)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::io(format!("Failed to run {:?}", self.binary), e))?;

        let waited = match self.refresh_timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!("Endpoints refresh exceeded {:?}, killing it", limit);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill endpoints refresh: {}", e);
                    }
                    return Err(FleetError::Timeout {
                        operation: format!("endpoints refresh of {}", workspace.id()),
                    });
                }
            },
            None => child.wait().await,
        };
        let status =
            waited.map_err(|e| FleetError::io("Failed to wait for endpoints refresh", e))?;

        if !status.success() {
            return Err(FleetError::ExternalToolFailure {
                tool: format!("{} config endpoints", self.binary.display()),
                status: status.to_string(),
            });
        }

        let marker = workspace.freshness_marker_path();
        std::fs::write(&marker, FRESHNESS_SENTINEL)
            .map_err(|e| FleetError::io(format!("Failed to write {:?}", marker), e))?;
        info!("Endpoints updated SUCCESSFULLY");
        Ok(())
    }

    /// Spawn the worker detached from this process and return its OS id
    ///
    /// The worker gets its own process group so terminal signals aimed at the
    /// supervisor do not reach it. Output goes to a fresh timestamped log.
    pub fn spawn_worker(&self, workspace: &Workspace, use_proxy: bool) -> FleetResult<u32> {
        let mut command = if use_proxy {
            let mut command = Command::new(&self.proxy_launcher);
            command.arg(&self.binary);
            command
        } else {
            Command::new(&self.binary)
        };

        let log_path = workspace.new_log_path();
        let log = open_log(&log_path, true)?;

        command
            .arg("--config")
            .arg(workspace.config_path())
            .arg("start")
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(clone_log(&log, workspace)?)
            .stderr(log);

        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            if use_proxy && e.kind() == ErrorKind::NotFound {
                FleetError::ProxyLauncherMissing {
                    name: self.proxy_launcher.clone(),
                }
            } else {
                FleetError::io(format!("Failed to spawn {:?}", self.binary), e)
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| FleetError::Internal("Spawned worker has no PID".to_string()))?;

        info!("Starting relayer with PID {}, logging to {:?}", pid, log_path);
        // Dropping the handle leaves the worker running; tokio reaps it if it
        // exits while this process is still alive.
        drop(child);
        Ok(pid)
    }
}

fn open_log(path: &Path, append: bool) -> FleetResult<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| FleetError::io(format!("Failed to open log {:?}", path), e))
}

fn clone_log(log: &File, workspace: &Workspace) -> FleetResult<File> {
    log.try_clone()
        .map_err(|e| FleetError::io(format!("Failed to open log in {:?}", workspace.root()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::test_support::{fake_relayer, workspace_with_config};
    use tempfile::TempDir;

    fn launcher(binary: PathBuf, refresh_timeout_secs: Option<u64>) -> Launcher {
        Launcher::new(&RelayerConfig {
            binary,
            proxy_launcher: "definitely-not-a-proxy-launcher".to_string(),
            refresh_timeout_secs,
            stop_grace_secs: 1,
        })
    }

    #[tokio::test]
    async fn test_refresh_writes_marker_once() {
        let home = TempDir::new().unwrap();
        let ws = workspace_with_config(home.path());
        let binary = fake_relayer(home.path(), "echo refreshed >> refresh-count", "exit 0");
        let launcher = launcher(binary, None);

        assert!(!launcher.endpoints_fresh(&ws));
        launcher.ensure_endpoints(&ws).await.unwrap();
        assert!(launcher.endpoints_fresh(&ws));

        launcher.ensure_endpoints(&ws).await.unwrap();
        let count = std::fs::read_to_string(ws.root().join("refresh-count")).unwrap();
        assert_eq!(count.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_stale_marker_triggers_refresh() {
        let home = TempDir::new().unwrap();
        let ws = workspace_with_config(home.path());
        std::fs::write(ws.freshness_marker_path(), "pending").unwrap();
        let binary = fake_relayer(home.path(), "exit 0", "exit 0");

        let launcher = launcher(binary, None);
        assert!(!launcher.endpoints_fresh(&ws));
        launcher.ensure_endpoints(&ws).await.unwrap();
        assert!(launcher.endpoints_fresh(&ws));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_marker_absent() {
        let home = TempDir::new().unwrap();
        let ws = workspace_with_config(home.path());
        let binary = fake_relayer(home.path(), "exit 2", "exit 0");

        let err = launcher(binary, None).ensure_endpoints(&ws).await.unwrap_err();

        assert!(matches!(err, FleetError::ExternalToolFailure { .. }));
        assert!(!ws.freshness_marker_path().exists());
    }

    #[tokio::test]
    async fn test_refresh_timeout() {
        let home = TempDir::new().unwrap();
        let ws = workspace_with_config(home.path());
        let binary = fake_relayer(home.path(), "exec sleep 30", "exit 0");

        let err = launcher(binary, Some(1)).ensure_endpoints(&ws).await.unwrap_err();

        assert!(matches!(err, FleetError::Timeout { .. }));
        assert!(!ws.freshness_marker_path().exists());
    }

    #[tokio::test]
    async fn test_missing_proxy_launcher() {
        let home = TempDir::new().unwrap();
        let ws = workspace_with_config(home.path());
        let binary = fake_relayer(home.path(), "exit 0", "exec sleep 30");

        let err = launcher(binary, None).spawn_worker(&ws, true).unwrap_err();

        assert!(matches!(err, FleetError::ProxyLauncherMissing { .. }));
    }
}
