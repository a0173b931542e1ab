//! OS process existence checks and signalling

use crate::error::{FleetError, FleetResult};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Liveness queries and termination by OS process id
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTable: Send + Sync {
    /// Whether a live (non-zombie) process with this id exists
    fn is_alive(&self, pid: u32) -> bool;

    /// Send a graceful termination signal; an already-gone process is not an error
    fn terminate(&self, pid: u32) -> FleetResult<()>;
}

/// The host's process table, queried with signal 0
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

impl OsProcessTable {
    /// Reject ids that `kill(2)` would interpret as process groups
    fn to_pid(pid: u32) -> Option<Pid> {
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
            _ => None,
        }
    }
}

impl ProcessTable for OsProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(nix_pid) = Self::to_pid(pid) else {
            return false;
        };

        match kill(nix_pid, None) {
            // EPERM: exists but owned by someone else
            Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
            Err(_) => false,
        }
    }

    fn terminate(&self, pid: u32) -> FleetResult<()> {
        let nix_pid = Self::to_pid(pid)
            .ok_or_else(|| FleetError::Internal(format!("Refusing to signal PID {}", pid)))?;

        match kill(nix_pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(FleetError::io(
                format!("Failed to send SIGTERM to PID {}", pid),
                std::io::Error::from(errno),
            )),
        }
    }
}

/// Exited children stay in the process table until reaped
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };

    // The command name may contain spaces; the state follows its closing paren
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
