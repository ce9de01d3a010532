//! Client Registry
//!
//! Coordinator-side bookkeeping of registered clients. The registry is
//! deduplicated, keeps arrival order, and is bounded by the configured
//! maximum node count; entries are only meaningful while the local node
//! is coordinator and the set is cleared on every transition into that
//! role.

use crate::addr::NodeAddr;

/// A registered client
#[derive(Debug, Clone)]
pub struct ClientEntry {
    /// Client address
    pub addr: NodeAddr,
    /// When the client registered
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Appended at the end of the arrival order
    Added,
    /// Duplicate registration, registry unchanged
    AlreadyPresent,
    /// Registry at capacity, join ignored
    Full,
}

/// Capacity-bounded, insertion-ordered set of client addresses
#[derive(Debug)]
pub struct ClientRegistry {
    entries: Vec<ClientEntry>,
    capacity: usize,
}

impl ClientRegistry {
    /// Create an empty registry with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Register a client
    ///
    /// No-op when the address is already present or the registry is at
    /// capacity; the outcome says which so the caller can report it.
    pub fn register(&mut self, addr: NodeAddr) -> RegisterOutcome {
        if self.entries.iter().any(|e| e.addr == addr) {
            return RegisterOutcome::AlreadyPresent;
        }
        if self.entries.len() >= self.capacity {
            return RegisterOutcome::Full;
        }
        self.entries.push(ClientEntry {
            addr,
            joined_at: chrono::Utc::now(),
        });
        RegisterOutcome::Added
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Registered addresses in arrival order
    pub fn members(&self) -> impl Iterator<Item = NodeAddr> + '_ {
        self.entries.iter().map(|e| e.addr)
    }

    /// Full entries in arrival order
    pub fn entries(&self) -> &[ClientEntry] {
        &self.entries
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether the registry is at capacity
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}
