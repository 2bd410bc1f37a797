#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]

//! In-process event bus for download lifecycle notifications.
//!
//! The bus assigns sequential identifiers and keeps a bounded replay ring so a
//! late subscriber can catch up from a known id. Internally it uses
//! `tokio::broadcast`; when a subscriber lags, the oldest events are dropped
//! for that subscriber only and publishers never block. [`HealthRegistry`]
//! layers degraded-component tracking on top of the bus.

mod health;

pub use health::HealthRegistry;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bindery_core::DownloadStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Typed domain events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new download was accepted by the remote agent and recorded.
    DownloadAdded {
        /// Record identifier.
        download_id: Uuid,
        /// Book title.
        title: String,
    },
    /// A record moved along its lifecycle.
    StatusChanged {
        /// Record identifier.
        download_id: Uuid,
        /// Previous status.
        from: DownloadStatus,
        /// New status.
        to: DownloadStatus,
    },
    /// Transfer progress advanced.
    Progress {
        /// Record identifier.
        download_id: Uuid,
        /// Percent complete.
        percent: f64,
    },
    /// An organize attempt began.
    OrganizeStarted {
        /// Record identifier.
        download_id: Uuid,
    },
    /// An organize attempt placed every file.
    OrganizeCompleted {
        /// Record identifier.
        download_id: Uuid,
        /// Library directory holding the files.
        path: String,
        /// Number of files placed.
        files: usize,
        /// Bytes placed.
        bytes: u64,
    },
    /// An organize attempt failed.
    OrganizeFailed {
        /// Record identifier.
        download_id: Uuid,
        /// Error text stored on the record.
        message: String,
    },
    /// A record was cancelled and deleted.
    DownloadRemoved {
        /// Record identifier.
        download_id: Uuid,
    },
    /// The set of degraded components changed.
    HealthChanged {
        /// Components currently degraded, sorted.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DownloadAdded { .. } => "download_added",
            Self::StatusChanged { .. } => "status_changed",
            Self::Progress { .. } => "progress",
            Self::OrganizeStarted { .. } => "organize_started",
            Self::OrganizeCompleted { .. } => "organize_completed",
            Self::OrganizeFailed { .. } => "organize_failed",
            Self::DownloadRemoved { .. } => "download_removed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Record the event concerns, if any.
    #[must_use]
    pub const fn download_id(&self) -> Option<Uuid> {
        match self {
            Self::DownloadAdded { download_id, .. }
            | Self::StatusChanged { download_id, .. }
            | Self::Progress { download_id, .. }
            | Self::OrganizeStarted { download_id }
            | Self::OrganizeCompleted { download_id, .. }
            | Self::OrganizeFailed { download_id, .. }
            | Self::DownloadRemoved { download_id } => Some(*download_id),
            Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper carrying the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a bus whose broadcast channel and replay ring hold
    /// `capacity` events. A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish an event, assigning it the next sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe, replaying buffered events newer than `since_id` first.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            self.buffer()
                .iter()
                .filter(|item| item.id > since)
                .cloned()
                .collect()
        });
        EventStream {
            backlog,
            receiver: self.sender.subscribe(),
        }
    }

    /// Identifier of the most recent event still buffered.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.buffer().back().map(|event| event.id)
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EventBus")
            .field("replay_capacity", &self.replay_capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Stream yielding the replay backlog, then live events.
#[derive(Debug)]
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event; `None` once every bus handle is dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
