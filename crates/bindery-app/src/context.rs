//! Shared service handles passed to the monitor and the download service.

use std::sync::Arc;

use bindery_config::SettingsProvider;
use bindery_core::{DownloadStore, RemoteAgent};
use bindery_events::{EventBus, HealthRegistry};
use bindery_library::Organizer;
use bindery_telemetry::Metrics;

/// Collaborators every application service is built from.
#[derive(Clone)]
pub struct AppContext {
    /// Download record persistence.
    pub store: Arc<dyn DownloadStore>,
    /// Remote download agent.
    pub agent: Arc<dyn RemoteAgent>,
    /// Settings source, consulted at the point of use.
    pub settings: Arc<dyn SettingsProvider>,
    /// Organization engine.
    pub organizer: Organizer,
    /// Lifecycle event bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Degraded component registry.
    pub health: HealthRegistry,
}

impl AppContext {
    /// Wire an organizer onto the given collaborators, sharing one health
    /// registry between the organizer and the callers.
    #[must_use]
    pub fn new(
        store: Arc<dyn DownloadStore>,
        agent: Arc<dyn RemoteAgent>,
        settings: Arc<dyn SettingsProvider>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let health = HealthRegistry::new(events.clone());
        let organizer = Organizer::new(
            Arc::clone(&agent),
            Arc::clone(&settings),
            events.clone(),
            metrics.clone(),
        )
        .with_health(health.clone());
        Self {
            store,
            agent,
            settings,
            organizer,
            events,
            metrics,
            health,
        }
    }

    /// Replace the organizer, keeping the shared health registry.
    #[must_use]
    pub fn with_organizer(mut self, organizer: Organizer) -> Self {
        self.organizer = organizer.with_health(self.health.clone());
        self
    }
}
