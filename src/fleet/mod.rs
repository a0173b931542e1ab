//! Fleet controller
//!
//! Applies the port allocator, workspace manager and process supervisor
//! across every instance found under a home directory. Fleet-wide commands
//! have partial-failure semantics: an error confined to one instance is
//! logged and the loop moves on, while errors that would repeat for every
//! instance (such as a missing proxy launcher) abort the command.
//! Single-instance commands fail fast.

mod init;
mod lookup;

pub use init::InitOptions;

use crate::config::Settings;
use crate::error::{FleetError, FleetResult};
use crate::ports::{PortAllocator, PortProbe, TcpPortProbe};
use crate::registry::ChainRegistry;
use crate::supervisor::{
    Launcher, OsProcessTable, ProcessTable, StartOutcome, StopOutcome, Supervisor,
};
use crate::workspace::{self, InstanceId, Workspace, CONFIG_FILE};

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Which instances a fleet-wide command applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every workspace with a generated config
    All,
    /// One chain pair, each side given as a chain name or chain id
    Pair { source: String, target: String },
}

/// Outcome of a fleet-wide start or stop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FleetReport {
    /// Instances acted on, with the affected PID
    pub changed: Vec<(InstanceId, u32)>,
    /// Instances already in the requested state
    pub unchanged: usize,
    pub failed: usize,
}

/// A live instance as reported by `show`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningInstance {
    pub id: InstanceId,
    pub pid: u32,
    pub workspace: PathBuf,
}

pub struct Fleet<P, T> {
    home: PathBuf,
    registry_path: PathBuf,
    base_port: u16,
    allocator: PortAllocator<P>,
    supervisor: Supervisor<T>,
}

impl Fleet<TcpPortProbe, OsProcessTable> {
    /// Fleet backed by real TCP probes and the host process table
    pub fn from_settings(home: &Path, settings: &Settings) -> Self {
        let allocator = PortAllocator::new(
            TcpPortProbe::new(settings.fleet.probe_timeout_ms),
            settings.fleet.max_port_probes,
        );
        let supervisor = Supervisor::new(
            OsProcessTable,
            Launcher::new(&settings.relayer),
            Duration::from_secs(settings.relayer.stop_grace_secs),
        );
        Self::new(home, settings, allocator, supervisor)
    }
}

impl<P: PortProbe, T: ProcessTable> Fleet<P, T> {
    pub fn new(
        home: &Path,
        settings: &Settings,
        allocator: PortAllocator<P>,
        supervisor: Supervisor<T>,
    ) -> Self {
        Self {
            home: home.to_path_buf(),
            registry_path: settings.chain_registry_path(home),
            base_port: settings.fleet.base_port,
            allocator,
            supervisor,
        }
    }

    fn load_registry(&self) -> FleetResult<ChainRegistry> {
        let registry = ChainRegistry::load(&self.registry_path)?;
        if registry.is_empty() {
            warn!("{}", FleetError::EmptyRegistry {
                path: self.registry_path.clone(),
            });
        }
        Ok(registry)
    }

    /// A stray `config.toml` in the home directory is picked up by the
    /// relayer as its default config, so it is removed before single-chain work
    fn remove_default_config(&self) -> FleetResult<()> {
        let default_cfg = self.home.join(CONFIG_FILE);
        if default_cfg.exists() {
            info!("Removing default config {:?}", default_cfg);
            std::fs::remove_file(&default_cfg)
                .map_err(|e| FleetError::io(format!("Failed to delete {:?}", default_cfg), e))?;
        }
        Ok(())
    }

    /// Workspaces named by a selector; pair selectors must resolve and exist
    fn select(&self, selector: &Selector) -> FleetResult<Vec<Workspace>> {
        match selector {
            Selector::All => workspace::discover(&self.home),
            Selector::Pair { source, target } => {
                let registry = self.load_registry()?;
                let resolve = |key: &str| {
                    registry
                        .resolve_either(key)
                        .map(|(_, chain_id)| chain_id.to_string())
                        .ok_or_else(|| FleetError::RegistryUnresolved {
                            key: key.to_string(),
                        })
                };
                let id = InstanceId::pair(resolve(source)?, resolve(target)?);
                let workspace = Workspace::new(&self.home, id);
                Self::require_config(&workspace)?;
                Ok(vec![workspace])
            }
        }
    }

    fn require_config(workspace: &Workspace) -> FleetResult<()> {
        workspace.ensure_exists()?;
        if !workspace.has_config() {
            return Err(FleetError::ConfigMissing {
                path: workspace.config_path(),
            });
        }
        Ok(())
    }

    /// Workspace of a single-chain instance, resolving the chain first
    fn single_workspace(&self, chain: &str) -> FleetResult<Workspace> {
        let chain = chain.trim().to_lowercase();
        if chain.is_empty() {
            return Err(FleetError::Config("Chain not provided".to_string()));
        }

        let registry = self.load_registry()?;
        registry.require_id(&chain)?;
        Ok(Workspace::new(&self.home, InstanceId::single(&chain)))
    }

    /// Start every selected instance that is not already running
    pub async fn start(&self, selector: &Selector, use_proxy: bool) -> FleetResult<FleetReport> {
        info!("Using home folder: {:?}", self.home);
        info!("{}", if use_proxy { "Using proxy" } else { "Not using proxy" });

        let mut report = FleetReport::default();
        for workspace in self.select(selector)? {
            info!("Trying {}", workspace.id());
            match self.supervisor.start(&workspace, use_proxy).await {
                Ok(StartOutcome::Started { pid }) => {
                    report.changed.push((workspace.id().clone(), pid));
                }
                Ok(StartOutcome::AlreadyRunning { .. }) => report.unchanged += 1,
                Err(e) if e.is_instance_local() => {
                    error!("Failed to start {}: {}", workspace.id(), e);
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Started {} instances, {} already running, {} failed",
            report.changed.len(),
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Start the single-chain instance for `chain`; every failure is fatal
    pub async fn start_one(&self, chain: &str, use_proxy: bool) -> FleetResult<StartOutcome> {
        let workspace = self.single_workspace(chain)?;
        self.remove_default_config()?;
        Self::require_config(&workspace)?;

        info!("{}", if use_proxy { "Using proxy" } else { "Not using proxy" });
        self.supervisor.start(&workspace, use_proxy).await
    }

    /// Stop every selected instance that is running
    pub async fn stop(&self, selector: &Selector) -> FleetResult<FleetReport> {
        info!("Using home folder: {:?}", self.home);

        let mut report = FleetReport::default();
        for workspace in self.select(selector)? {
            match self.supervisor.stop(&workspace).await {
                Ok(StopOutcome::Stopped { pid }) => {
                    report.changed.push((workspace.id().clone(), pid));
                }
                Ok(StopOutcome::NotRunning) => report.unchanged += 1,
                Err(e) if e.is_instance_local() => {
                    error!("Failed to stop {}: {}", workspace.id(), e);
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Stop the single-chain instance for `chain`; a missing workspace is a no-op
    pub async fn stop_one(&self, chain: &str) -> FleetResult<StopOutcome> {
        let workspace = self.single_workspace(chain)?;
        if !workspace.exists() {
            warn!("Folder {:?} not found", workspace.root());
            return Ok(StopOutcome::NotRunning);
        }

        self.supervisor.stop(&workspace).await
    }

    /// Every running instance, in workspace order
    pub fn show(&self) -> FleetResult<Vec<RunningInstance>> {
        let mut running = Vec::new();

        for workspace in workspace::discover(&self.home)? {
            match self.supervisor.status(&workspace) {
                Ok(state) => {
                    if let Some(pid) = state.running_pid() {
                        running.push(RunningInstance {
                            id: workspace.id().clone(),
                            pid,
                            workspace: workspace.root().to_path_buf(),
                        });
                    }
                }
                Err(e) => warn!("Failed to read status of {}: {}", workspace.id(), e),
            }
        }

        crate::metrics::record_running_instances(running.len());
        Ok(running)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::supervisor::test_support::fake_relayer;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_start_stop_start_reuses_workspace() {
        let home = TempDir::new().unwrap();
        write_registry(home.path());
        write_channels(home.path(), "phoenix-1", &["osmosis-1"]);
        let binary = fake_relayer(home.path(), "exit 0", "exec sleep 30");
        let fleet = fleet(home.path(), binary);

        fleet
            .init(&writing_generator(), InitOptions::default())
            .await
            .unwrap();
        let id = InstanceId::pair("phoenix-1", "osmosis-1");

        let first = fleet.start(&Selector::All, false).await.unwrap();
        assert_eq!(first.changed.len(), 1);
        let (started_id, first_pid) = first.changed[0].clone();
        assert_eq!(started_id, id);

        let again = fleet.start(&Selector::All, false).await.unwrap();
        assert!(again.changed.is_empty());
        assert_eq!(again.unchanged, 1);

        let shown = fleet.show().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].pid, first_pid);

        let stopped = fleet.stop(&Selector::All).await.unwrap();
        assert_eq!(stopped.changed, vec![(id.clone(), first_pid)]);
        assert!(fleet.show().unwrap().is_empty());

        let second = fleet
            .start(
                &Selector::Pair {
                    source: "terra2".to_string(),
                    target: "osmosis-1".to_string(),
                },
                false,
            )
            .await
            .unwrap();
        let (_, second_pid) = second.changed[0].clone();
        assert_ne!(first_pid, second_pid);
        assert!(home.path().join("phoenix-1_osmosis-1/dest.txt").exists());

        fleet.stop(&Selector::All).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_on_stopped_fleet_is_noop() {
        let home = TempDir::new().unwrap();
        write_registry(home.path());
        write_channels(home.path(), "phoenix-1", &["osmosis-1"]);
        let fleet = fleet(home.path(), PathBuf::from("hermes"));
        fleet
            .init(&writing_generator(), InitOptions::default())
            .await
            .unwrap();

        let report = fleet.stop(&Selector::All).await.unwrap();

        assert!(report.changed.is_empty());
        assert_eq!(report.unchanged, 1);
        assert!(!home.path().join("phoenix-1_osmosis-1/process.pid").exists());
    }

    #[tokio::test]
    async fn test_one_failing_instance_does_not_abort_fleet() {
        let home = TempDir::new().unwrap();
        write_registry(home.path());
        write_channels(home.path(), "phoenix-1", &["osmosis-1", "juno-1"]);
        let binary = fake_relayer(
            home.path(),
            r#"case "$2" in *juno-1*) exit 1;; esac"#,
            "exec sleep 30",
        );
        let fleet = fleet(home.path(), binary);
        fleet
            .init(&writing_generator(), InitOptions::default())
            .await
            .unwrap();

        let report = fleet.start(&Selector::All, false).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.changed[0].0, InstanceId::pair("phoenix-1", "osmosis-1"));

        fleet.stop(&Selector::All).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_one_unknown_chain_touches_nothing() {
        let home = TempDir::new().unwrap();
        write_registry(home.path());
        std::fs::write(home.path().join(CONFIG_FILE), "default").unwrap();
        let fleet = fleet(home.path(), PathBuf::from("hermes"));

        let err = fleet.start_one("UnknownChain", false).await.unwrap_err();

        assert!(matches!(err, FleetError::RegistryUnresolved { ref key } if key == "unknownchain"));
        assert!(!home.path().join("unknownchain_hermes").exists());
        assert!(home.path().join(CONFIG_FILE).exists());
    }

    #[tokio::test]
    async fn test_start_one_without_registry_is_fatal() {
        let home = TempDir::new().unwrap();
        let fleet = fleet(home.path(), PathBuf::from("hermes"));

        let err = fleet.start_one("terra2", false).await.unwrap_err();
        assert!(matches!(err, FleetError::RegistryMissing { .. }));
    }

    #[tokio::test]
    async fn test_pair_selector_requires_existing_workspace() {
        let home = TempDir::new().unwrap();
        write_registry(home.path());
        let fleet = fleet(home.path(), PathBuf::from("hermes"));

        let err = fleet
            .start(
                &Selector::Pair {
                    source: "terra2".to_string(),
                    target: "juno".to_string(),
                },
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::WorkspaceMissing { .. }));

        let err = fleet
            .stop(&Selector::Pair {
                source: "terra2".to_string(),
                target: "nowhere".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::RegistryUnresolved { .. }));
    }

    #[tokio::test]
    async fn test_stop_one_without_workspace_is_noop() {
        let home = TempDir::new().unwrap();
        write_registry(home.path());
        let fleet = fleet(home.path(), PathBuf::from("hermes"));

        assert_eq!(fleet.stop_one("juno").await.unwrap(), StopOutcome::NotRunning);
    }
}
