//! Liveness tracking for the companion peer.
//!
//! A single owner task holds the peer reference. Readiness, death
//! notifications and snapshot queries are messages on one channel and are
//! applied in arrival order, so death notifications may fire from any thread
//! without touching the reference directly.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{PeerHandle, ServiceLocator};
use crate::ipc::{require_system_caller, CallerIdentity, ServiceCall};
use crate::service::ServiceError;
use crate::telemetry::{log_security_event, SecurityEvent};

const UNAVAILABLE_DESPITE_CONTACT: &str = "statscompanion unavailable despite it contacting statsd!";

enum TrackerEvent {
    PeerReady {
        peer: PeerHandle,
        ack: oneshot::Sender<()>,
    },
    PeerDied,
    Snapshot(oneshot::Sender<Option<PeerHandle>>),
}

/// Current knowledge about the companion peer.
#[derive(Clone, Default)]
pub enum PeerState {
    #[default]
    Absent,
    Present(PeerHandle),
}

impl PeerState {
    pub fn is_present(&self) -> bool {
        matches!(self, PeerState::Present(_))
    }

    pub fn peer(&self) -> Option<&PeerHandle> {
        match self {
            PeerState::Present(peer) => Some(peer),
            PeerState::Absent => None,
        }
    }

    /// Store a freshly looked-up peer, replacing any previous one.
    pub fn on_ready(&mut self, peer: PeerHandle) {
        *self = PeerState::Present(peer);
    }

    /// Clear the reference. Returns whether a peer was present.
    pub fn on_terminated(&mut self) -> bool {
        let was_present = self.is_present();
        *self = PeerState::Absent;
        was_present
    }
}

impl std::fmt::Debug for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Absent => f.write_str("Absent"),
            PeerState::Present(_) => f.write_str("Present(..)"),
        }
    }
}

/// Death notification target handed to the peer's transport.
#[derive(Clone)]
pub struct DeathRecipient {
    events: mpsc::UnboundedSender<TrackerEvent>,
}

impl DeathRecipient {
    /// Called by the transport when the peer process dies.
    pub fn binder_died(&self) {
        log_security_event(SecurityEvent::PeerDied, "statscompanion service died", &[]);
        if self.events.send(TrackerEvent::PeerDied).is_err() {
            tracing::debug!("companion tracker stopped; death notification dropped");
        }
    }
}

/// Handle to the tracker's owner task.
#[derive(Clone)]
pub struct CompanionTracker {
    events: mpsc::UnboundedSender<TrackerEvent>,
    locator: ServiceLocator,
}

impl CompanionTracker {
    /// Spawn the owner task. It runs until `shutdown` is cancelled.
    pub fn spawn(locator: ServiceLocator, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_owner(receiver, shutdown));
        (Self { events, locator }, handle)
    }

    /// The companion announced readiness: look it up, store it and watch it.
    pub async fn on_peer_ready(&self, caller: CallerIdentity) -> Result<(), ServiceError> {
        require_system_caller(caller, ServiceCall::StatsCompanionReady.method_name())?;

        let peer = self
            .locator
            .stats_companion()
            .ok_or_else(|| ServiceError::PeerUnavailable(UNAVAILABLE_DESPITE_CONTACT.into()))?;

        // Store before linking: a death that fires right after linking is
        // queued behind the store and clears it.
        let (ack, stored) = oneshot::channel();
        self.events
            .send(TrackerEvent::PeerReady { peer: peer.clone(), ack })
            .map_err(|_| tracker_stopped())?;
        stored.await.map_err(|_| tracker_stopped())?;

        tracing::debug!("linking to statscompanion");
        if let Err(e) = peer.link_to_death(self.death_recipient()) {
            tracing::warn!(error = %e, "statscompanion died before its death watch was linked");
            self.on_peer_terminated();
            return Err(ServiceError::PeerUnavailable(UNAVAILABLE_DESPITE_CONTACT.into()));
        }

        log_security_event(SecurityEvent::PeerLinked, "statscompanion linked", &[]);
        Ok(())
    }

    /// Tell the companion that the service is ready. Failures are only logged.
    pub fn notify_best_effort(&self) {
        let Some(peer) = self.locator.stats_companion() else {
            tracing::debug!("could not access statscompanion");
            return;
        };

        tracing::debug!("telling statscompanion that statsd is ready");
        if let Err(e) = peer.stats_ready() {
            tracing::warn!(error = %e, "statscompanion ready notification failed");
        }
    }

    /// Termination notification body. Idempotent.
    pub fn on_peer_terminated(&self) {
        self.death_recipient().binder_died();
    }

    /// Current peer reference, observed after all previously queued events.
    pub async fn current(&self) -> Option<PeerHandle> {
        let (reply, snapshot) = oneshot::channel();
        self.events.send(TrackerEvent::Snapshot(reply)).ok()?;
        snapshot.await.ok().flatten()
    }

    pub async fn is_peer_present(&self) -> bool {
        self.current().await.is_some()
    }

    fn death_recipient(&self) -> DeathRecipient {
        DeathRecipient { events: self.events.clone() }
    }
}

fn tracker_stopped() -> ServiceError {
    ServiceError::PeerUnavailable("companion tracker is stopped".into())
}

async fn run_owner(mut events: mpsc::UnboundedReceiver<TrackerEvent>, shutdown: CancellationToken) {
    let mut state = PeerState::Absent;
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!("companion tracker: shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => apply(&mut state, event),
                None => break,
            }
        }
    }
}

fn apply(state: &mut PeerState, event: TrackerEvent) {
    match event {
        TrackerEvent::PeerReady { peer, ack } => {
            let replaced = state.is_present();
            state.on_ready(peer);
            tracing::debug!(replaced, "companion reference stored");
            let _ = ack.send(());
        }
        TrackerEvent::PeerDied => {
            if state.on_terminated() {
                tracing::info!("companion reference cleared");
            } else {
                tracing::debug!("companion reference already absent");
            }
        }
        TrackerEvent::Snapshot(reply) => {
            let _ = reply.send(state.peer().cloned());
        }
    }
}
