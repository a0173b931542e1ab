//! Workspace creation from the channel registry

use super::Fleet;
use crate::error::{FleetError, FleetResult};
use crate::ports::{PortCursor, PortProbe};
use crate::registry::{channel_file_path, discover_channel_files, load_channels};
use crate::supervisor::ProcessTable;
use crate::workspace::{ConfigGenerator, InstanceId, PrepareRequest, Workspace, WorkspaceManager};

use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    /// Delete and recreate workspaces that already exist
    pub force: bool,
    /// Leave workspaces that already have a generated config alone
    pub only_missing: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub prepared: Vec<InstanceId>,
    /// Pairs or documents skipped because they could not be resolved or read
    pub skipped: usize,
    /// Pairs whose allocation or generation failed
    pub failed: usize,
}

impl<P: PortProbe, T: ProcessTable> Fleet<P, T> {
    /// Create a workspace for every resolvable (source, target) pair listed
    /// in the `*-channels.json` documents under home
    ///
    /// One port cursor is shared by the whole run. Unresolvable chains,
    /// empty documents and per-pair failures are logged and skipped.
    pub async fn init<G: ConfigGenerator>(
        &self,
        manager: &WorkspaceManager<G>,
        options: InitOptions,
    ) -> FleetResult<InitReport> {
        info!("Using HOME: {:?}", self.home);
        let registry = self.load_registry()?;

        let mut cursor = PortCursor::new(self.base_port);
        let mut report = InitReport::default();

        for file in discover_channel_files(&self.home)? {
            let record = match load_channels(&file.path) {
                Ok(record) => record,
                Err(e @ FleetError::EmptyRegistry { .. }) => {
                    warn!("{}. Skipping", e);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("Failed to read {:?}: {}", file.path, e);
                    report.skipped += 1;
                    continue;
                }
            };

            info!(
                "Processing channels from {} in registry {:?}",
                file.chain_id, file.path
            );

            let Some(source_name) = registry.resolve_name(&record.source_chain_id) else {
                warn!(
                    "Chain id {} not found in registry. Skipping {} channels",
                    record.source_chain_id,
                    record.targets.len()
                );
                report.skipped += record.targets.len();
                continue;
            };

            let resolved = record.resolved_targets(&registry);
            report.skipped += record.targets.len() - resolved.len();

            for (target_id, target_name) in resolved {
                let id = InstanceId::pair(&record.source_chain_id, target_id);
                let workspace = Workspace::new(&self.home, id.clone());

                if options.only_missing && !options.force && workspace.has_config() {
                    continue;
                }

                let ports = match self.allocator.allocate_pair(&mut cursor).await {
                    Ok(ports) => ports,
                    Err(e) => {
                        error!("Failed to allocate ports for {}: {}", id, e);
                        report.failed += 1;
                        continue;
                    }
                };

                info!("Adding config for {}", id);
                info!("Using {} for REST", ports.rest);
                info!("Using {} for TELEMETRY", ports.telemetry);

                let request = PrepareRequest {
                    workspace: &workspace,
                    source_name,
                    target_names: vec![target_name],
                    ports,
                    force: options.force,
                };
                match manager.prepare(request).await {
                    Ok(()) => report.prepared.push(id),
                    Err(e) => {
                        error!("Failed to prepare {}: {}", id, e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Prepared {} workspaces, skipped {}, failed {}",
            report.prepared.len(),
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Create the single-chain workspace relaying `chain` to all of its targets
    ///
    /// Unlike `init`, every precondition failure is fatal, including an
    /// empty channel document.
    pub async fn init_one<G: ConfigGenerator>(
        &self,
        manager: &WorkspaceManager<G>,
        chain: &str,
        force: bool,
    ) -> FleetResult<Workspace> {
        let workspace = self.single_workspace(chain)?;
        self.remove_default_config()?;

        let registry = self.load_registry()?;
        let source_id = registry.require_id(chain)?;
        let record = load_channels(&channel_file_path(&self.home, source_id))?;
        let source_name = registry.require_name(&record.source_chain_id)?;

        info!(
            "Processing channels from {} ({} targets)",
            record.source_chain_id,
            record.targets.len()
        );
        let target_names: Vec<&str> = record
            .resolved_targets(&registry)
            .into_iter()
            .map(|(_, name)| name)
            .collect();

        let mut cursor = PortCursor::new(self.base_port);
        let ports = self.allocator.allocate_pair(&mut cursor).await?;

        manager
            .prepare(PrepareRequest {
                workspace: &workspace,
                source_name,
                target_names,
                ports,
                force,
            })
            .await?;

        Ok(workspace)
    }
}
