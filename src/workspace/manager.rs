//! Workspace creation and config generation

use super::{ConfigGenerator, GenerateRequest, Workspace};
use crate::error::{FleetError, FleetResult};
use crate::ports::PortPair;

use std::fs;
use tracing::{debug, info};

/// Everything needed to (re)build one workspace
#[derive(Debug, Clone)]
pub struct PrepareRequest<'a> {
    pub workspace: &'a Workspace,
    /// Resolved source chain name
    pub source_name: &'a str,
    /// Resolved target chain names, in channel document order
    pub target_names: Vec<&'a str>,
    pub ports: PortPair,
    /// Delete an existing workspace before creating it
    pub force: bool,
}

/// Creates workspace directories and drives the config generator
pub struct WorkspaceManager<G> {
    generator: G,
}

impl<G: ConfigGenerator> WorkspaceManager<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    /// Create or reuse the workspace, write its manifest and generate its config
    pub async fn prepare(&self, request: PrepareRequest<'_>) -> FleetResult<()> {
        let workspace = request.workspace;
        let root = workspace.root();

        if root.exists() && request.force {
            info!("Folder {:?} exists. Deleting...", root);
            fs::remove_dir_all(root)
                .map_err(|e| FleetError::io(format!("Failed to delete {:?}", root), e))?;
        }

        if !root.exists() {
            fs::create_dir_all(root)
                .map_err(|e| FleetError::io(format!("Failed to create {:?}", root), e))?;
            info!("Created folder {:?}", root);
        } else {
            debug!("Reusing folder {:?}", root);
        }

        let manifest = workspace.manifest_path();
        let mut contents = String::new();
        for name in std::iter::once(request.source_name).chain(request.target_names.iter().copied()) {
            contents.push_str(name);
            contents.push('\n');
        }
        fs::write(&manifest, contents)
            .map_err(|e| FleetError::io(format!("Failed to write {:?}", manifest), e))?;

        self.generator
            .generate(&GenerateRequest {
                manifest,
                source_chain: request.source_name.to_string(),
                workspace: root.to_path_buf(),
                ports: request.ports,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{InstanceId, MockConfigGenerator};
    use tempfile::TempDir;

    const PORTS: PortPair = PortPair {
        rest: 3002,
        telemetry: 3003,
    };

    fn accepting_generator() -> MockConfigGenerator {
        let mut generator = MockConfigGenerator::new();
        generator.expect_generate().returning(|_| Ok(()));
        generator
    }

    #[tokio::test]
    async fn test_writes_manifest_in_order() {
        let home = TempDir::new().unwrap();
        let ws = Workspace::new(home.path(), InstanceId::single("terra2"));
        let manager = WorkspaceManager::new(accepting_generator());

        manager
            .prepare(PrepareRequest {
                workspace: &ws,
                source_name: "terra2",
                target_names: vec!["osmosis", "axelar"],
                ports: PORTS,
                force: false,
            })
            .await
            .unwrap();

        let manifest = fs::read_to_string(ws.manifest_path()).unwrap();
        assert_eq!(manifest, "terra2\nosmosis\naxelar\n");
    }

    #[tokio::test]
    async fn test_generator_receives_workspace_and_ports() {
        let home = TempDir::new().unwrap();
        let ws = Workspace::new(home.path(), InstanceId::pair("phoenix-1", "osmosis-1"));
        let expected_root = ws.root().to_path_buf();

        let mut generator = MockConfigGenerator::new();
        generator
            .expect_generate()
            .withf(move |req| {
                req.source_chain == "terra2"
                    && req.workspace == expected_root
                    && req.manifest == expected_root.join("dest.txt")
                    && req.ports == PORTS
            })
            .times(1)
            .returning(|_| Ok(()));

        WorkspaceManager::new(generator)
            .prepare(PrepareRequest {
                workspace: &ws,
                source_name: "terra2",
                target_names: vec!["osmosis"],
                ports: PORTS,
                force: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reuse_keeps_files_and_force_recreates() {
        let home = TempDir::new().unwrap();
        let ws = Workspace::new(home.path(), InstanceId::pair("phoenix-1", "osmosis-1"));
        fs::create_dir_all(ws.root()).unwrap();
        let keep = ws.root().join("log-20240101000000.log");
        fs::write(&keep, "old").unwrap();

        let manager = WorkspaceManager::new(accepting_generator());
        let request = PrepareRequest {
            workspace: &ws,
            source_name: "terra2",
            target_names: vec!["osmosis"],
            ports: PORTS,
            force: false,
        };

        manager.prepare(request.clone()).await.unwrap();
        assert!(keep.exists());

        manager
            .prepare(PrepareRequest {
                force: true,
                ..request
            })
            .await
            .unwrap();
        assert!(!keep.exists());
        assert!(ws.manifest_path().exists());
    }

    #[tokio::test]
    async fn test_generator_failure_propagates() {
        let home = TempDir::new().unwrap();
        let ws = Workspace::new(home.path(), InstanceId::pair("phoenix-1", "osmosis-1"));

        let mut generator = MockConfigGenerator::new();
        generator.expect_generate().returning(|_| {
            Err(FleetError::ExternalToolFailure {
                tool: "prepare-config.sh".to_string(),
                status: "exit status: 1".to_string(),
            })
        });

        let err = WorkspaceManager::new(generator)
            .prepare(PrepareRequest {
                workspace: &ws,
                source_name: "terra2",
                target_names: vec!["osmosis"],
                ports: PORTS,
                force: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::ExternalToolFailure { .. }));
    }
}
