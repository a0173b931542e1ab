//! Local port pair allocation for relayer instances
//!
//! Each instance needs a REST port and a telemetry port. Ports are probed
//! with a TCP connect: a refused connection means nothing is listening and
//! the port is free. Both searches share one forward-only cursor, so two
//! instances allocated in the same run never overlap. The cursor is not
//! persisted; separate runs only avoid ports that are currently listening.

mod probe;

pub use probe::{PortProbe, TcpPortProbe};

#[cfg(test)]
pub use probe::MockPortProbe;

use crate::error::{FleetError, FleetResult};
use std::fmt;
use tracing::{debug, warn};

/// Forward-only allocation cursor shared by all allocations of one run
///
/// Held as `u32` so the cursor can move past `u16::MAX` once the last port
/// has been claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCursor {
    next: u32,
}

impl PortCursor {
    pub fn new(base: u16) -> Self {
        Self { next: base as u32 }
    }

    /// Next port that will be probed
    #[cfg(test)]
    pub fn position(&self) -> u32 {
        self.next
    }
}

/// Ports assigned to one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub rest: u16,
    pub telemetry: u16,
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rest={} telemetry={}", self.rest, self.telemetry)
    }
}

/// Finds unused port pairs by probing forward from a cursor
pub struct PortAllocator<P> {
    probe: P,
    /// Probes allowed per port search before failing with `PortExhausted`
    max_probes: u16,
}

impl<P: PortProbe> PortAllocator<P> {
    pub fn new(probe: P, max_probes: u16) -> Self {
        Self { probe, max_probes }
    }

    /// Allocate a REST and a telemetry port, advancing the cursor past both
    pub async fn allocate_pair(&self, cursor: &mut PortCursor) -> FleetResult<PortPair> {
        let rest = self.claim_next(cursor).await?;
        let telemetry = self.claim_next(cursor).await?;

        let pair = PortPair { rest, telemetry };
        debug!("Allocated {}", pair);
        crate::metrics::record_ports_allocated();
        Ok(pair)
    }

    /// Claim the first free port at or after the cursor
    async fn claim_next(&self, cursor: &mut PortCursor) -> FleetResult<u16> {
        let from = clamp_port(cursor.next);
        let mut candidate = cursor.next;

        for _ in 0..self.max_probes {
            let port = u16::try_from(candidate).map_err(|_| FleetError::PortExhausted {
                from,
                to: u16::MAX,
            })?;

            let listening = match self.probe.is_listening(port).await {
                Ok(listening) => listening,
                Err(e) => {
                    warn!("Probe of port {} failed, treating as occupied: {}", port, e);
                    true
                }
            };

            candidate += 1;
            if !listening {
                cursor.next = candidate;
                return Ok(port);
            }
        }

        Err(FleetError::PortExhausted {
            from,
            to: clamp_port(candidate),
        })
    }
}

fn clamp_port(port: u32) -> u16 {
    u16::try_from(port).unwrap_or(u16::MAX)
}
