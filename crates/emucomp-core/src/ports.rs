//! Shared pool of external TCP ports for gateway nodes.
//!
//! A port is held by a [`PortLease`]; dropping the lease returns the port, so
//! a component that fails halfway through initialisation cannot leak it.

use crate::config::PortRange;
use crate::error::{CoreError, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Pool of free ports from a fixed range.
#[derive(Debug)]
pub struct PortPool {
    range: PortRange,
    free: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    /// Create a pool holding every port in `range`.
    pub fn new(range: PortRange) -> Arc<Self> {
        tracing::debug!(range = %range, "Creating port pool");
        Arc::new(Self {
            range,
            free: Mutex::new(range.iter().collect()),
        })
    }

    /// Take the lowest free port.
    pub fn acquire(self: &Arc<Self>) -> Result<PortLease> {
        let port = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.pop_first()
        };
        match port {
            Some(port) => {
                tracing::debug!(port, "Port acquired");
                Ok(PortLease {
                    port,
                    pool: Arc::clone(self),
                })
            }
            None => {
                tracing::warn!(range = %self.range, "Port pool exhausted");
                Err(CoreError::PortsExhausted(self.range.to_string()))
            }
        }
    }

    /// Number of ports currently free.
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The configured range.
    pub fn range(&self) -> PortRange {
        self.range
    }

    fn release(&self, port: u16) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port);
        tracing::debug!(port, "Port released");
    }
}

/// Exclusive use of one port until dropped.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<PortPool>,
}

impl PortLease {
    /// The leased port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}
