//! Chain name <-> chain id registry

use crate::error::{FleetError, FleetResult};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Bidirectional chain name / chain id lookup
///
/// Names are stored lower-cased and lookups lower-case their input.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    by_name: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

impl ChainRegistry {
    /// Load the registry from a `{ "name": "chain-id", ... }` document
    pub fn load(path: &Path) -> FleetResult<Self> {
        if !path.exists() {
            return Err(FleetError::RegistryMissing {
                path: path.to_path_buf(),
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| FleetError::io(format!("Failed to read {:?}", path), e))?;

        let entries: BTreeMap<String, String> =
            serde_json::from_str(&raw).map_err(|source| FleetError::RegistryCorrupt {
                path: path.to_path_buf(),
                source,
            })?;

        let registry = Self::from_entries(entries);
        debug!("Loaded {} chains from {:?}", registry.len(), path);
        Ok(registry)
    }

    /// Build a registry from name/id pairs; a later duplicate id wins the inverse view
    pub fn from_entries<I, N, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();

        for (name, chain_id) in entries {
            let name = name.into().to_lowercase();
            let chain_id = chain_id.into();
            by_id.insert(chain_id.clone(), name.clone());
            by_name.insert(name, chain_id);
        }

        Self { by_name, by_id }
    }

    /// Chain id for a chain name
    pub fn resolve_id(&self, name: &str) -> Option<&str> {
        self.by_name.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Chain name for a chain id
    pub fn resolve_name(&self, chain_id: &str) -> Option<&str> {
        self.by_id.get(chain_id).map(String::as_str)
    }

    /// Chain id for a chain name, failing with `RegistryUnresolved`
    pub fn require_id(&self, name: &str) -> FleetResult<&str> {
        self.resolve_id(name)
            .ok_or_else(|| FleetError::RegistryUnresolved {
                key: name.to_lowercase(),
            })
    }

    /// Chain name for a chain id, failing with `RegistryUnresolved`
    pub fn require_name(&self, chain_id: &str) -> FleetResult<&str> {
        self.resolve_name(chain_id)
            .ok_or_else(|| FleetError::RegistryUnresolved {
                key: chain_id.to_string(),
            })
    }

    /// Resolve a key that may be either a chain name or a chain id into `(name, id)`
    pub fn resolve_either(&self, key: &str) -> Option<(&str, &str)> {
        if let Some((name, chain_id)) = self.by_name.get_key_value(&key.to_lowercase()) {
            return Some((name.as_str(), chain_id.as_str()));
        }

        self.by_id
            .get_key_value(key)
            .map(|(chain_id, name)| (name.as_str(), chain_id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
