//! Service lookup through an injected registry.

use std::sync::Arc;

use dashmap::DashMap;

use super::PeerHandle;

/// Well-known name the companion peer registers under.
pub const STATS_COMPANION_SERVICE: &str = "statscompanion";

/// Registry of named services published by other processes.
pub trait ServiceRegistry: Send + Sync {
    /// Non-blocking lookup; `None` if the service is not registered.
    fn check_service(&self, name: &str) -> Option<PeerHandle>;
}

/// Looks up peers by name. Every call re-queries the registry.
#[derive(Clone)]
pub struct ServiceLocator {
    registry: Option<Arc<dyn ServiceRegistry>>,
}

impl ServiceLocator {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { registry: Some(registry) }
    }

    /// A locator whose registry could not be reached.
    pub fn unavailable() -> Self {
        Self { registry: None }
    }

    pub fn lookup(&self, name: &str) -> Option<PeerHandle> {
        let Some(registry) = &self.registry else {
            tracing::warn!(service = name, "service registry unavailable");
            return None;
        };

        let found = registry.check_service(name);
        if found.is_none() {
            tracing::warn!(service = name, "{name} service unavailable!");
        }
        found
    }

    pub fn stats_companion(&self) -> Option<PeerHandle> {
        self.lookup(STATS_COMPANION_SERVICE)
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("registry_available", &self.registry.is_some())
            .finish()
    }
}

/// Registry backed by a concurrent map, for services living in this process.
#[derive(Default)]
pub struct InProcessRegistry {
    services: DashMap<String, PeerHandle>,
}

impl InProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a service, replacing any previous entry with the same name.
    pub fn add_service(&self, name: impl Into<String>, service: PeerHandle) {
        self.services.insert(name.into(), service);
    }

    pub fn remove_service(&self, name: &str) -> Option<PeerHandle> {
        self.services.remove(name).map(|(_, service)| service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceRegistry for InProcessRegistry {
    fn check_service(&self, name: &str) -> Option<PeerHandle> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }
}
