//! Read-only registry queries behind `channels` and `config`

use super::Fleet;
use crate::error::{FleetError, FleetResult};
use crate::ports::PortProbe;
use crate::registry::{channel_file_path, load_channels, ChannelRecord};
use crate::supervisor::ProcessTable;
use crate::workspace::{self, InstanceId};

use serde::Serialize;
use tracing::debug;

/// Registry entry for one chain plus the workspaces that relay it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub name: String,
    pub chain_id: String,
    pub workspaces: Vec<InstanceId>,
}

impl<P: PortProbe, T: ProcessTable> Fleet<P, T> {
    /// Channel document for `key`, taken as a chain id first and as a chain
    /// name if no usable document exists under that id
    pub fn channels(&self, key: &str) -> FleetResult<ChannelRecord> {
        let key = key.trim().to_lowercase();
        let direct = channel_file_path(&self.home, &key);
        match load_channels(&direct) {
            Err(FleetError::ChannelRegistryMissing { .. }) | Err(FleetError::EmptyRegistry { .. }) => {}
            result => return result,
        }

        debug!("No channel document at {:?}, resolving {} as a name", direct, key);
        let registry = self.load_registry()?;
        match registry.resolve_id(&key) {
            Some(chain_id) => load_channels(&channel_file_path(&self.home, chain_id)),
            None => Err(FleetError::ChannelRegistryMissing { path: direct }),
        }
    }

    /// Registry entry for a chain name or id
    pub fn describe_chain(&self, key: &str) -> FleetResult<ChainSummary> {
        let registry = self.load_registry()?;
        let (name, chain_id) =
            registry
                .resolve_either(key.trim())
                .ok_or_else(|| FleetError::RegistryUnresolved {
                    key: key.trim().to_string(),
                })?;

        let workspaces = workspace::discover(&self.home)?
            .into_iter()
            .map(|ws| ws.id().clone())
            .filter(|id| match id {
                InstanceId::Pair { source, target } => source == chain_id || target == chain_id,
                InstanceId::Single { chain } => chain == name,
            })
            .collect();

        Ok(ChainSummary {
            name: name.to_string(),
            chain_id: chain_id.to_string(),
            workspaces,
        })
    }
}
