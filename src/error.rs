//! Error types for the relayer fleet supervisor

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for fleet operations
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required file {path:?} not found")]
    ConfigMissing { path: PathBuf },

    #[error("Chain registry {path:?} not found")]
    RegistryMissing { path: PathBuf },

    #[error("Chain registry {path:?} is not valid JSON: {source}")]
    RegistryCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Chain {key} not found in registry")]
    RegistryUnresolved { key: String },

    #[error("Registry {path:?} is empty")]
    EmptyRegistry { path: PathBuf },

    #[error("Channel registry {path:?} not found")]
    ChannelRegistryMissing { path: PathBuf },

    #[error("Invalid channel registry file name {name}")]
    InvalidChannelFile { name: String },

    #[error("{tool} failed with {status}")]
    ExternalToolFailure { tool: String, status: String },

    #[error("No free port pair found between {from} and {to}")]
    PortExhausted { from: u16, to: u16 },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Workspace {path:?} not found")]
    WorkspaceMissing { path: PathBuf },

    #[error("{name} is not installed")]
    ProxyLauncherMissing { name: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Wrap an I/O error with a short description of what was being done
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FleetError::Io {
            context: context.into(),
            source,
        }
    }

    /// Errors confined to one instance; fleet-wide loops log these and move on
    pub fn is_instance_local(&self) -> bool {
        matches!(
            self,
            FleetError::RegistryUnresolved { .. }
                | FleetError::EmptyRegistry { .. }
                | FleetError::InvalidChannelFile { .. }
                | FleetError::ExternalToolFailure { .. }
                | FleetError::PortExhausted { .. }
                | FleetError::Timeout { .. }
                | FleetError::Io { .. }
        )
    }

    /// Process exit code reported for this error
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Result type for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;
