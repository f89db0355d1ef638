//! The cooperating "statscompanion" peer: lookup and liveness tracking.
//!
//! The peer is found through an injected [`ServiceRegistry`]. Once it
//! announces readiness, the [`CompanionTracker`] owns the only reference to
//! it and drops that reference when the peer's death notification arrives.

mod locator;
mod tracker;

use std::sync::Arc;

use thiserror::Error;

pub use locator::{InProcessRegistry, ServiceLocator, ServiceRegistry, STATS_COMPANION_SERVICE};
pub use tracker::{CompanionTracker, DeathRecipient, PeerState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Peer process is dead")]
    DeadObject,

    #[error("Peer transport failure: {0}")]
    Transport(String),
}

/// Remote interface of the companion peer.
pub trait StatsCompanion: Send + Sync {
    /// One-way notification that the stats service is ready.
    fn stats_ready(&self) -> Result<(), PeerError>;

    /// Ask the transport to call `recipient` when the peer process dies.
    ///
    /// Fails with [`PeerError::DeadObject`] if the peer is already gone.
    fn link_to_death(&self, recipient: DeathRecipient) -> Result<(), PeerError>;
}

/// Shared handle to the companion peer.
pub type PeerHandle = Arc<dyn StatsCompanion>;
