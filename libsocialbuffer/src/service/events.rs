//! Domain events
//!
//! Services announce lifecycle changes on an in-process bus built on
//! `tokio::sync::broadcast`. Emitting never blocks: with no subscribers the
//! event is dropped, and a lagging subscriber loses the oldest events.
//!
//! # Example
//!
//! ```no_run
//! use libsocialbuffer::service::events::{DomainEvent, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(DomainEvent::PostDeleted {
//!     post_id: uuid::Uuid::new_v4(),
//!     user_id: 7,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::FailureKind;
use crate::poster::PublishResult;
use crate::types::{PostStatus, PostType};

pub type EventReceiver = broadcast::Receiver<DomainEvent>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    ///
    /// # Example
    ///
    /// ```
    /// use libsocialbuffer::service::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: DomainEvent) {
        tracing::debug!(event = event.name(), post_id = %event.post_id(), "Domain event");
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    PostCreated {
        post_id: Uuid,
        user_id: i64,
        post_type: PostType,
        status: PostStatus,
    },

    PostScheduled {
        post_id: Uuid,
        user_id: i64,
        scheduled_at: DateTime<Utc>,
    },

    PostPublished {
        post_id: Uuid,
        user_id: i64,
        results: Vec<PublishResult>,
    },

    PostPublishFailed {
        post_id: Uuid,
        user_id: i64,
        error: String,
        error_kind: FailureKind,
        retry_count: u32,
        /// Whether the sweep will try again.
        retry_eligible: bool,
        results: Vec<PublishResult>,
    },

    PostDeleted {
        post_id: Uuid,
        user_id: i64,
    },

    /// Total engagement crossed the configured threshold.
    PostEngagementThreshold {
        post_id: Uuid,
        user_id: i64,
        engagement: u64,
        threshold: u64,
    },
}

impl DomainEvent {
    pub fn post_id(&self) -> Uuid {
        match self {
            DomainEvent::PostCreated { post_id, .. }
            | DomainEvent::PostScheduled { post_id, .. }
            | DomainEvent::PostPublished { post_id, .. }
            | DomainEvent::PostPublishFailed { post_id, .. }
            | DomainEvent::PostDeleted { post_id, .. }
            | DomainEvent::PostEngagementThreshold { post_id, .. } => *post_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PostCreated { .. } => "post_created",
            DomainEvent::PostScheduled { .. } => "post_scheduled",
            DomainEvent::PostPublished { .. } => "post_published",
            DomainEvent::PostPublishFailed { .. } => "post_publish_failed",
            DomainEvent::PostDeleted { .. } => "post_deleted",
            DomainEvent::PostEngagementThreshold { .. } => "post_engagement_threshold",
        }
    }
}
