//! Channel registry documents
//!
//! One document per source chain, stored as `<chain_id>-channels.json`:
//! `{ "chain": { "chain_id": .. }, "channels": [ { "chain": { "chain_id": .. } }, .. ] }`.
//! Unknown fields are ignored and a missing `channels` list decodes as empty.

use super::ChainRegistry;
use crate::error::{FleetError, FleetResult};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

const CHANNEL_FILE_SUFFIX: &str = "-channels.json";

lazy_static! {
    static ref CHANNEL_FILE: Regex = Regex::new(r"^(.*)-channels\.json$").unwrap();
}

#[derive(Debug, Deserialize)]
struct ChannelDocument {
    chain: ChainRef,
    #[serde(default)]
    channels: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChainRef {
    chain_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    chain: ChainRef,
}

/// Open channels from one source chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub source_chain_id: String,
    pub targets: Vec<ChannelTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub target_chain_id: String,
}

impl ChannelRecord {
    /// Target ids that resolve to chain names, as `(id, name)`; others are skipped with a warning
    pub fn resolved_targets<'r>(&'r self, registry: &'r ChainRegistry) -> Vec<(&'r str, &'r str)> {
        self.targets
            .iter()
            .filter_map(|target| {
                let chain_id = target.target_chain_id.as_str();
                match registry.resolve_name(chain_id) {
                    Some(name) => Some((chain_id, name)),
                    None => {
                        warn!(
                            "Chain id {} not found in registry. Skipping...",
                            chain_id
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Target ids sorted ascending
    pub fn sorted_target_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .targets
            .iter()
            .map(|t| t.target_chain_id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// A channel document found under the home directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFile {
    pub path: PathBuf,
    /// Chain id taken from the file name
    pub chain_id: String,
}

/// Path of the channel document for a source chain id
pub fn channel_file_path(home: &Path, chain_id: &str) -> PathBuf {
    home.join(format!("{}{}", chain_id, CHANNEL_FILE_SUFFIX))
}

/// Parse one channel document
///
/// Missing files fail with `ChannelRegistryMissing`, zero-length or
/// whitespace-only files with `EmptyRegistry`. Call sites decide whether an
/// empty document is a warning or a hard stop.
pub fn load_channels(path: &Path) -> FleetResult<ChannelRecord> {
    if !path.is_file() {
        return Err(FleetError::ChannelRegistryMissing {
            path: path.to_path_buf(),
        });
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| FleetError::io(format!("Failed to read {:?}", path), e))?;

    if raw.trim().is_empty() {
        return Err(FleetError::EmptyRegistry {
            path: path.to_path_buf(),
        });
    }

    let document: ChannelDocument =
        serde_json::from_str(&raw).map_err(|source| FleetError::RegistryCorrupt {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(ChannelRecord {
        source_chain_id: document.chain.chain_id,
        targets: document
            .channels
            .into_iter()
            .map(|entry| ChannelTarget {
                target_chain_id: entry.chain.chain_id,
            })
            .collect(),
    })
}

/// List `*-channels.json` documents in the home directory, sorted by file name
///
/// Files whose name carries no chain id are skipped with a warning.
pub fn discover_channel_files(home: &Path) -> FleetResult<Vec<ChannelFile>> {
    let entries = std::fs::read_dir(home)
        .map_err(|e| FleetError::io(format!("Failed to list {:?}", home), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FleetError::io(format!("Failed to list {:?}", home), e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(caps) = CHANNEL_FILE.captures(file_name) else {
            continue;
        };

        let chain_id = caps[1].to_string();
        if chain_id.is_empty() {
            let err = FleetError::InvalidChannelFile {
                name: file_name.to_string(),
            };
            warn!("{}", err);
            continue;
        }

        files.push(ChannelFile { path, chain_id });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
