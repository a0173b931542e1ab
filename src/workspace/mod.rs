//! On-disk workspaces for relayer instances
//!
//! Every instance owns one directory under the home directory:
//!
//! - `<source_id>_<target_id>/` for a chain pair created by `init`
//! - `<chain>_hermes/` for a single chain relaying to all of its targets
//!
//! The directory holds the generator manifest, the generated relayer
//! config, the PID file, the endpoints freshness marker and one log file
//! per spawned process. All paths are derived from an explicit
//! [`Workspace`] handle; nothing changes the process working directory.

mod generator;
mod manager;

pub use generator::{ConfigGenerator, GenerateRequest, ScriptGenerator};
pub use manager::{PrepareRequest, WorkspaceManager};

#[cfg(test)]
pub use generator::MockConfigGenerator;

use crate::error::{FleetError, FleetResult};

use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "dest.txt";
pub const CONFIG_FILE: &str = "config.toml";
pub const PID_FILE: &str = "process.pid";
pub const FRESHNESS_MARKER: &str = "endpoints_status.log";
pub const FRESHNESS_SENTINEL: &str = "updated";
pub const REFRESH_LOG: &str = "endpoints.log";

/// Directory suffix marking a single-chain workspace
const SINGLE_SUFFIX: &str = "hermes";

/// Identity of a supervised instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum InstanceId {
    /// One source chain id relaying to one target chain id
    Pair { source: String, target: String },
    /// One chain name relaying to every target in its channel document
    Single { chain: String },
}

impl InstanceId {
    pub fn pair(source: impl Into<String>, target: impl Into<String>) -> Self {
        InstanceId::Pair {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn single(chain: impl AsRef<str>) -> Self {
        InstanceId::Single {
            chain: chain.as_ref().to_lowercase(),
        }
    }

    /// Workspace directory name for this instance
    pub fn dir_name(&self) -> String {
        match self {
            InstanceId::Pair { source, target } => format!("{}_{}", source, target),
            InstanceId::Single { chain } => format!("{}_{}", chain, SINGLE_SUFFIX),
        }
    }

    /// Parse a workspace directory name; names that do not split into
    /// exactly two non-empty parts on `_` are not instances
    pub fn parse(dir_name: &str) -> Option<Self> {
        let parts: Vec<&str> = dir_name.split('_').collect();
        match parts.as_slice() {
            [chain, SINGLE_SUFFIX] if !chain.is_empty() => Some(InstanceId::single(chain)),
            [source, target] if !source.is_empty() && !target.is_empty() => {
                Some(InstanceId::pair(*source, *target))
            }
            _ => None,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceId::Pair { source, target } => write!(f, "{} => {}", source, target),
            InstanceId::Single { chain } => write!(f, "{} => *", chain),
        }
    }
}

/// Handle to one instance's directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    id: InstanceId,
    root: PathBuf,
}

impl Workspace {
    pub fn new(home: &Path, id: InstanceId) -> Self {
        let root = home.join(id.dir_name());
        Self { id, root }
    }

    /// Open an existing directory as a workspace if its name is an instance id
    pub fn from_dir(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let id = InstanceId::parse(name)?;
        Some(Self {
            id,
            root: path.to_path_buf(),
        })
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn freshness_marker_path(&self) -> PathBuf {
        self.root.join(FRESHNESS_MARKER)
    }

    pub fn refresh_log_path(&self) -> PathBuf {
        self.root.join(REFRESH_LOG)
    }

    /// Fresh timestamped log file path for a newly spawned process
    pub fn new_log_path(&self) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d%H%M%S");
        self.root.join(format!("log-{}.log", timestamp))
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Whether the generator has produced a relayer config here
    pub fn has_config(&self) -> bool {
        self.config_path().is_file()
    }

    /// Fail with `WorkspaceMissing` unless the directory exists
    pub fn ensure_exists(&self) -> FleetResult<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(FleetError::WorkspaceMissing {
                path: self.root.clone(),
            })
        }
    }
}

/// Workspaces under `home` that carry a generated config, in directory name order
pub fn discover(home: &Path) -> FleetResult<Vec<Workspace>> {
    let entries = std::fs::read_dir(home)
        .map_err(|e| FleetError::io(format!("Failed to list {:?}", home), e))?;

    let mut workspaces = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FleetError::io(format!("Failed to list {:?}", home), e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        if let Some(workspace) = Workspace::from_dir(&path) {
            if workspace.has_config() {
                workspaces.push(workspace);
            }
        }
    }

    workspaces.sort_by(|a, b| a.root.cmp(&b.root));
    Ok(workspaces)
}
