//! Telemetry failures.
//!
//! Collector errors carry the metric name and the stage that failed, so a
//! clash between two registrations is readable from the startup log alone.

use std::fmt::{self, Display, Formatter};
use std::string::FromUtf8Error;

use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Point at which a metric collector failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStage {
    /// Constructing the collector from its options.
    Build,
    /// Adding the collector to the registry.
    Register,
}

impl Display for CollectorStage {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Build => "built",
            Self::Register => "registered",
        })
    }
}

/// Errors raised while wiring logs and metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global log subscriber was already installed.
    #[error("log subscriber could not be installed")]
    LoggingInstalled {
        /// Underlying subscriber error.
        source: TryInitError,
    },
    /// A metric collector could not be built or registered.
    #[error("metric {metric} could not be {stage}")]
    Collector {
        /// Metric name.
        metric: &'static str,
        /// Stage that failed.
        stage: CollectorStage,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The registry could not be encoded in the text exposition format.
    #[error("metrics exposition could not be encoded")]
    Exposition {
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The encoder produced bytes that are not UTF-8.
    #[error("metrics exposition is not valid utf-8")]
    ExpositionText {
        /// Underlying conversion error.
        source: FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn build(metric: &'static str, source: prometheus::Error) -> Self {
        Self::Collector {
            metric,
            stage: CollectorStage::Build,
            source,
        }
    }

    pub(crate) const fn register(metric: &'static str, source: prometheus::Error) -> Self {
        Self::Collector {
            metric,
            stage: CollectorStage::Register,
            source,
        }
    }
}
