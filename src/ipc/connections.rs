//! Connection limiting for the socket transport.
//!
//! Slots are held by an owned RAII guard so that a connection task can carry
//! its slot for as long as it runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_connections: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { max_connections: 32 }
    }
}

/// Counts live connections against a fixed ceiling.
#[derive(Debug)]
pub struct ConnectionPool {
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max_connections: config.max_connections.max(1),
        })
    }

    /// Take a slot, or `None` when the pool is full.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let mut current = self.active.load(Ordering::Relaxed);
        loop {
            if current >= self.max_connections {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(ConnectionGuard { pool: Arc::clone(self) }),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// Releases its slot on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    pool: Arc<ConnectionPool>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
    }
}
