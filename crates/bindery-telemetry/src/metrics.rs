//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters the monitor and the organizer report into.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    monitor_ticks_total: IntCounter,
    remote_query_failures_total: IntCounter,
    status_transitions_total: IntCounterVec,
    organize_steps_total: IntCounterVec,
    organize_outcomes_total: IntCounterVec,
    active_downloads: IntGauge,
}

/// Snapshot of selected gauges and counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Records the monitor reconciled on its last tick.
    pub active_downloads: i64,
    /// Monitor ticks completed.
    pub monitor_ticks_total: u64,
    /// Remote agent status queries that failed.
    pub remote_query_failures_total: u64,
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let monitor_ticks_total = counter("monitor_ticks_total", "Download monitor ticks completed")?;
        let remote_query_failures_total = counter(
            "remote_query_failures_total",
            "Remote agent status queries that failed",
        )?;
        let status_transitions_total = counter_vec(
            "status_transitions_total",
            "Download status transitions by target status",
            &["status"],
        )?;
        let organize_steps_total = counter_vec(
            "organize_steps_total",
            "Organization steps executed by status",
            &["step", "status"],
        )?;
        let organize_outcomes_total = counter_vec(
            "organize_outcomes_total",
            "Organize attempts by outcome",
            &["outcome"],
        )?;
        let active_downloads = IntGauge::with_opts(Opts::new(
            "active_downloads",
            "Downloads reconciled on the last monitor tick",
        ))
        .map_err(|source| TelemetryError::build("active_downloads", source))?;

        register(&registry, "monitor_ticks_total", monitor_ticks_total.clone())?;
        register(
            &registry,
            "remote_query_failures_total",
            remote_query_failures_total.clone(),
        )?;
        register(
            &registry,
            "status_transitions_total",
            status_transitions_total.clone(),
        )?;
        register(&registry, "organize_steps_total", organize_steps_total.clone())?;
        register(
            &registry,
            "organize_outcomes_total",
            organize_outcomes_total.clone(),
        )?;
        register(&registry, "active_downloads", active_downloads.clone())?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                monitor_ticks_total,
                remote_query_failures_total,
                status_transitions_total,
                organize_steps_total,
                organize_outcomes_total,
                active_downloads,
            }),
        })
    }

    /// Count a completed monitor tick.
    pub fn inc_monitor_tick(&self) {
        self.inner.monitor_ticks_total.inc();
    }

    /// Count a failed remote status query.
    pub fn inc_remote_query_failure(&self) {
        self.inner.remote_query_failures_total.inc();
    }

    /// Count a status transition into `status`.
    pub fn inc_status_transition(&self, status: &str) {
        self.inner
            .status_transitions_total
            .with_label_values(&[status])
            .inc();
    }

    /// Count an organization step outcome.
    pub fn inc_organize_step(&self, step: &str, status: &str) {
        self.inner
            .organize_steps_total
            .with_label_values(&[step, status])
            .inc();
    }

    /// Count an organize attempt outcome (`organized`, `failed`, `timeout`).
    pub fn inc_organize_outcome(&self, outcome: &str) {
        self.inner
            .organize_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Set the active download gauge.
    pub fn set_active_downloads(&self, count: usize) {
        self.inner
            .active_downloads
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Current value of an organize step counter.
    #[must_use]
    pub fn organize_step_count(&self, step: &str, status: &str) -> u64 {
        self.inner
            .organize_steps_total
            .with_label_values(&[step, status])
            .get()
    }

    /// Current value of an organize outcome counter.
    #[must_use]
    pub fn organize_outcome_count(&self, outcome: &str) -> u64 {
        self.inner
            .organize_outcomes_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Exposition { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionText { source })
    }

    /// Take a point-in-time snapshot of the monitor gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_downloads: self.inner.active_downloads.get(),
            monitor_ticks_total: self.inner.monitor_ticks_total.get(),
            remote_query_failures_total: self.inner.remote_query_failures_total.get(),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::build(name, source))
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::build(name, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> Result<()>
where
    C: prometheus::core::Collector + 'static,
{
    registry
        .register(Box::new(collector))
        .map_err(|source| TelemetryError::register(name, source))
}
