//! PID file convention: a single integer, no trailing structure

use crate::error::{FleetError, FleetResult};

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Recorded process id; `None` when the file is absent, empty or unreadable as an integer
    pub fn read(&self) -> FleetResult<Option<u32>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FleetError::io(
                    format!("Failed to read {:?}", self.path),
                    e,
                ))
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        match trimmed.parse::<u32>() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                warn!("Ignoring malformed PID file {:?}: {:?}", self.path, trimmed);
                Ok(None)
            }
        }
    }

    pub fn write(&self, pid: u32) -> FleetResult<()> {
        fs::write(&self.path, pid.to_string())
            .map_err(|e| FleetError::io(format!("Failed to write {:?}", self.path), e))
    }

    /// Delete the file; absence is not an error
    pub fn remove(&self) -> FleetResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FleetError::io(
                format!("Failed to delete {:?}", self.path),
                e,
            )),
        }
    }
}
