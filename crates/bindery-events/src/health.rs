//! Degraded-component tracking that announces changes on the event bus.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::{Event, EventBus};

/// Shared set of degraded components.
///
/// Every change to the set publishes [`Event::HealthChanged`] with the full,
/// sorted list; repeated reports for an already degraded component only log.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    events: EventBus,
    degraded: Arc<Mutex<BTreeSet<String>>>,
}

impl HealthRegistry {
    /// Registry publishing on `events`.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            degraded: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Flag `component` as degraded.
    pub fn mark_degraded(&self, component: &str, detail: &str) {
        let snapshot = {
            let mut degraded = self.degraded.lock().unwrap_or_else(PoisonError::into_inner);
            degraded
                .insert(component.to_string())
                .then(|| degraded.iter().cloned().collect::<Vec<_>>())
        };
        if let Some(degraded) = snapshot {
            warn!(component, detail = %detail, "component degraded");
            self.events.publish(Event::HealthChanged { degraded });
        } else {
            warn!(component, detail = %detail, "component still degraded");
        }
    }

    /// Clear the degraded flag for `component`, if set.
    pub fn mark_recovered(&self, component: &str) {
        let snapshot = {
            let mut degraded = self.degraded.lock().unwrap_or_else(PoisonError::into_inner);
            degraded
                .remove(component)
                .then(|| degraded.iter().cloned().collect::<Vec<_>>())
        };
        if let Some(degraded) = snapshot {
            info!(component, "component recovered");
            self.events.publish(Event::HealthChanged { degraded });
        }
    }

    /// Components currently degraded, sorted.
    #[must_use]
    pub fn degraded(&self) -> Vec<String> {
        self.degraded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
