//! Port claim tracking and conflict detection.
//!
//! The allocator is the source of truth for "managed" conflicts: a claim is
//! recorded the moment a reservation succeeds and removed once the process
//! is confirmed stopped. External conflicts (sockets bound outside our
//! bookkeeping) are detected through a [`SocketProbe`] at reservation time.

use super::probe::{SocketProbe, SystemProbe};
use crate::error::{ConflictKind, Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Record that a specific port is currently bound by a managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortClaim {
    pub port: u16,
    pub service_id: String,
    pub bound_at: DateTime<Utc>,
}

/// Tracks claimed ports and detects conflicts against both the managed
/// claim table and externally-bound sockets.
///
/// # Thread Safety
///
/// The claim table sits behind a synchronous mutex held only for map
/// lookups and inserts, never across the (bounded) OS probe. Concurrent
/// reservations of unrelated ports therefore proceed in parallel: a
/// provisional claim is inserted before probing so two racing reservations
/// of the *same* port serialise on the table, and the claim is rolled back
/// if the probe reports an external conflict.
pub struct PortAllocator {
    claims: Mutex<HashMap<u16, PortClaim>>,
    probe: Box<dyn SocketProbe>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::with_probe(Box::new(SystemProbe))
    }

    pub fn with_probe(probe: Box<dyn SocketProbe>) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            probe,
        }
    }

    /// Reserve `port` for `service_id`.
    ///
    /// Checks, in order: the managed claim table (a retry by the same
    /// service is idempotent success), then the OS socket table. On success
    /// a [`PortClaim`] is recorded.
    pub fn reserve(&self, port: u16, service_id: &str) -> Result<()> {
        if port == 0 {
            return Err(Error::PortOutOfRange(0));
        }

        {
            let mut claims = self.claims.lock();
            if let Some(existing) = claims.get(&port) {
                if existing.service_id == service_id {
                    return Ok(());
                }
                return Err(Error::PortConflict {
                    port,
                    kind: ConflictKind::Managed {
                        held_by: existing.service_id.clone(),
                    },
                });
            }
            // Provisional claim: racing reservations of the same port now
            // fail as Managed instead of both passing the external probe.
            claims.insert(
                port,
                PortClaim {
                    port,
                    service_id: service_id.to_string(),
                    bound_at: Utc::now(),
                },
            );
        }

        // A socket bound without a claim is by definition external: every
        // process we manage holds a claim for its port.
        if self.probe.is_port_bound(port) {
            self.claims.lock().remove(&port);
            let occupant = self.probe.occupant(port);
            return Err(Error::PortConflict {
                port,
                kind: ConflictKind::External {
                    pid: occupant.as_ref().map(|o| o.pid),
                    process_name: occupant.map(|o| o.name),
                },
            });
        }

        Ok(())
    }

    /// Release every claim held by `service_id`. Idempotent.
    pub fn release(&self, service_id: &str) {
        self.claims
            .lock()
            .retain(|_, claim| claim.service_id != service_id);
    }

    /// Record a claim without probing the OS.
    ///
    /// Used when adopting an externally-started process that already holds
    /// its port; probing would report the service's own socket as a
    /// conflict.
    pub fn mark_claimed(&self, port: u16, service_id: &str) {
        self.claims.lock().insert(
            port,
            PortClaim {
                port,
                service_id: service_id.to_string(),
                bound_at: Utc::now(),
            },
        );
    }

    /// True if `port` passes both conflict checks right now.
    pub fn is_free(&self, port: u16) -> bool {
        if port == 0 || self.claims.lock().contains_key(&port) {
            return false;
        }
        !self.probe.is_port_bound(port)
    }

    /// Suggest a free port, scanning upward from `preferred` and wrapping
    /// within `[range_start, range_end]`.
    ///
    /// Deterministic for a fixed claim table and probe state: the first
    /// port that passes both conflict checks is returned, so `reserve`
    /// accepts the suggestion at the same instant.
    pub fn suggest_free(&self, preferred: u16, range_start: u16, range_end: u16) -> Result<u16> {
        if range_start == 0 || range_end < range_start {
            return Err(Error::PortOutOfRange(range_start as u32));
        }
        let len = (range_end - range_start) as u32 + 1;
        let base = preferred.clamp(range_start, range_end) - range_start;

        for offset in 0..len {
            let port = range_start + ((base as u32 + offset) % len) as u16;
            if self.claims.lock().contains_key(&port) {
                continue;
            }
            if self.probe.is_port_bound(port) {
                continue;
            }
            return Ok(port);
        }

        Err(Error::PortExhausted {
            start: range_start,
            end: range_end,
        })
    }

    /// All current claims, ordered by port, for display.
    pub fn list_bindings(&self) -> Vec<PortClaim> {
        let mut bindings: Vec<PortClaim> = self.claims.lock().values().cloned().collect();
        bindings.sort_by_key(|claim| claim.port);
        bindings
    }

    /// The claim held by `service_id`, if any.
    pub fn claim_for(&self, service_id: &str) -> Option<PortClaim> {
        self.claims
            .lock()
            .values()
            .find(|claim| claim.service_id == service_id)
            .cloned()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}
