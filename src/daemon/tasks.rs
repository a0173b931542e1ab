//! Built-in daemon tasks

use super::DaemonTask;
use crate::error::{FleetError, FleetResult};
use crate::fleet::{Fleet, InitOptions, Selector};
use crate::ports::PortProbe;
use crate::proxy::ProxyUpdater;
use crate::supervisor::ProcessTable;
use crate::workspace::{ConfigGenerator, WorkspaceManager};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Stop the whole fleet, pause, then start it again through the proxy
pub struct FleetRestartTask<P, T> {
    fleet: Arc<Fleet<P, T>>,
    pause: Duration,
}

impl<P, T> FleetRestartTask<P, T> {
    pub fn new(fleet: Arc<Fleet<P, T>>, pause: Duration) -> Self {
        Self { fleet, pause }
    }
}

#[async_trait]
impl<P, T> DaemonTask for FleetRestartTask<P, T>
where
    P: PortProbe + 'static,
    T: ProcessTable + 'static,
{
    fn name(&self) -> &str {
        "fleet"
    }

    async fn run_once(&self) -> FleetResult<()> {
        info!("Stopping all relayer instances...");
        let stopped = self.fleet.stop(&Selector::All).await?;
        debug!("Stopped {} instances", stopped.changed.len());

        tokio::time::sleep(self.pause).await;

        info!("Starting all relayer instances...");
        let started = self.fleet.start(&Selector::All, true).await?;
        if started.failed > 0 {
            warn!("{} instances failed to start", started.failed);
        }

        info!("Waiting next round...");
        Ok(())
    }
}

/// Run an external command, e.g. a chain registry refresh script
pub struct CommandTask {
    name: String,
    argv: Vec<String>,
    cwd: PathBuf,
}

impl CommandTask {
    /// Fails with a config error when `argv` is empty
    pub fn new(name: &str, argv: &[String], cwd: &Path) -> FleetResult<Self> {
        if argv.is_empty() {
            return Err(FleetError::Config(format!(
                "No command configured for the {} daemon",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
            argv: argv.to_vec(),
            cwd: cwd.to_path_buf(),
        })
    }

    async fn execute(&self) -> FleetResult<()> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| FleetError::Internal("Empty command".to_string()))?;

        info!("Running {}", self.argv.join(" "));
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FleetError::io(format!("Failed to run {}", program), e))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("{}: {}", self.name, line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                warn!("{} stderr: {}", self.name, stderr.trim());
            }
            return Err(FleetError::ExternalToolFailure {
                tool: program.clone(),
                status: output.status.to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl DaemonTask for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> FleetResult<()> {
        self.execute().await
    }
}

/// Refresh the channel documents, then create workspaces for new pairs
pub struct ChannelsTask<P, T, G> {
    discovery: Option<CommandTask>,
    fleet: Arc<Fleet<P, T>>,
    manager: WorkspaceManager<G>,
}

impl<P, T, G> ChannelsTask<P, T, G> {
    pub fn new(
        discovery: Option<CommandTask>,
        fleet: Arc<Fleet<P, T>>,
        manager: WorkspaceManager<G>,
    ) -> Self {
        Self {
            discovery,
            fleet,
            manager,
        }
    }
}

#[async_trait]
impl<P, T, G> DaemonTask for ChannelsTask<P, T, G>
where
    P: PortProbe + 'static,
    T: ProcessTable + 'static,
    G: ConfigGenerator + 'static,
{
    fn name(&self) -> &str {
        "channels"
    }

    async fn run_once(&self) -> FleetResult<()> {
        if let Some(discovery) = &self.discovery {
            discovery.execute().await?;
        }

        let report = self
            .fleet
            .init(
                &self.manager,
                InitOptions {
                    force: false,
                    only_missing: true,
                },
            )
            .await?;
        info!("{} new workspaces", report.prepared.len());
        Ok(())
    }
}

/// Rewrite the proxychains config from the proxy list
pub struct ProxyTask {
    updater: ProxyUpdater,
}

impl ProxyTask {
    pub fn new(updater: ProxyUpdater) -> Self {
        Self { updater }
    }
}

#[async_trait]
impl DaemonTask for ProxyTask {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn run_once(&self) -> FleetResult<()> {
        self.updater.update().map(|_| ())
    }
}
