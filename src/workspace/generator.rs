//! External relayer config generator

use crate::error::{FleetError, FleetResult};
use crate::ports::PortPair;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Inputs handed to the generator for one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub manifest: PathBuf,
    pub source_chain: String,
    pub workspace: PathBuf,
    pub ports: PortPair,
}

/// Produces the relayer config inside a workspace
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> FleetResult<()>;
}

/// Runs the `prepare-config.sh` style script:
/// `-f <manifest> -s <source chain> -r <workspace> -p <rest port> -m <telemetry port>`
pub struct ScriptGenerator {
    script: PathBuf,
}

impl ScriptGenerator {
    /// Use the script at `path`, failing with `ConfigMissing` when it is absent
    pub fn locate(path: &Path) -> FleetResult<Self> {
        if !path.is_file() {
            return Err(FleetError::ConfigMissing {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            script: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl ConfigGenerator for ScriptGenerator {
    async fn generate(&self, request: &GenerateRequest) -> FleetResult<()> {
        info!(
            "---- Starting autoconfiguration with source {} ----",
            request.source_chain
        );

        let status = Command::new(&self.script)
            .arg("-f")
            .arg(&request.manifest)
            .arg("-s")
            .arg(&request.source_chain)
            .arg("-r")
            .arg(&request.workspace)
            .arg("-p")
            .arg(request.ports.rest.to_string())
            .arg("-m")
            .arg(request.ports.telemetry.to_string())
            .status()
            .await
            .map_err(|e| FleetError::io(format!("Failed to run {:?}", self.script), e))?;

        if !status.success() {
            return Err(FleetError::ExternalToolFailure {
                tool: self.script.display().to_string(),
                status: status.to_string(),
            });
        }

        info!("---- Completed autoconfiguration ----");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("prepare-config.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request(dir: &Path) -> GenerateRequest {
        GenerateRequest {
            manifest: dir.join("dest.txt"),
            source_chain: "terra2".to_string(),
            workspace: dir.to_path_buf(),
            ports: PortPair {
                rest: 3000,
                telemetry: 3001,
            },
        }
    }

    #[test]
    fn test_missing_script_is_config_missing() {
        let dir = TempDir::new().unwrap();
        let result = ScriptGenerator::locate(&dir.path().join("prepare-config.sh"));
        assert!(matches!(result, Err(FleetError::ConfigMissing { .. })));
    }

    #[tokio::test]
    async fn test_passes_positional_flags() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), r#"echo "$@" > "$6/args.txt""#);
        let generator = ScriptGenerator::locate(&script).unwrap();

        generator.generate(&request(dir.path())).await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        let expected = format!(
            "-f {} -s terra2 -r {} -p 3000 -m 3001\n",
            dir.path().join("dest.txt").display(),
            dir.path().display()
        );
        assert_eq!(args, expected);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_failure() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "exit 3");
        let generator = ScriptGenerator::locate(&script).unwrap();

        let err = generator.generate(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, FleetError::ExternalToolFailure { .. }));
    }
}
