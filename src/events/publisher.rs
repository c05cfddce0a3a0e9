use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::constants::events;
use crate::messaging::ReplyIntent;
use crate::models::{Channel, FailureType, HealingActionKind};
use crate::state_machine::EnrollmentStatus;

/// State change worth telling the rest of the platform about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    EnrollmentBooked {
        enrollment_id: Uuid,
        tenant_id: Uuid,
        call_id: Option<String>,
    },
    EnrollmentReplied {
        enrollment_id: Uuid,
        tenant_id: Uuid,
        intent: ReplyIntent,
        /// Always true for replies that keep the enrollment alive
        notify_human: bool,
    },
    EnrollmentTerminated {
        enrollment_id: Uuid,
        tenant_id: Uuid,
        status: EnrollmentStatus,
        reason: String,
    },
    HealingApplied {
        enrollment_id: Uuid,
        tenant_id: Uuid,
        failure_type: FailureType,
        action: HealingActionKind,
        channel: Option<Channel>,
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnrollmentBooked { .. } => events::ENROLLMENT_BOOKED,
            Self::EnrollmentReplied { .. } => events::ENROLLMENT_REPLIED,
            Self::EnrollmentTerminated { .. } => events::ENROLLMENT_TERMINATED,
            Self::HealingApplied { .. } => events::HEALING_APPLIED,
        }
    }

    pub fn enrollment_id(&self) -> Uuid {
        match self {
            Self::EnrollmentBooked { enrollment_id, .. }
            | Self::EnrollmentReplied { enrollment_id, .. }
            | Self::EnrollmentTerminated { enrollment_id, .. }
            | Self::HealingApplied { enrollment_id, .. } => *enrollment_id,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: LifecycleEvent,
    pub published_at: DateTime<Utc>,
}

/// Fan-out publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers and return how many received it.
    /// Having no subscriber is not an error.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let name = event.name();
        let enrollment_id = event.enrollment_id();
        let published = PublishedEvent {
            name,
            event,
            published_at: Utc::now(),
        };

        match self.sender.send(published) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(_)) => {
                debug!(event = name, enrollment_id = %enrollment_id, "No lifecycle subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booked() -> LifecycleEvent {
        LifecycleEvent::EnrollmentBooked {
            enrollment_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            call_id: Some("call_1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let publisher = EventPublisher::new(8);
        assert_eq!(publisher.publish(booked()), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_named_events() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.publish(booked()), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name, events::ENROLLMENT_BOOKED);
        assert!(matches!(received.event, LifecycleEvent::EnrollmentBooked { .. }));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(booked()).unwrap();
        assert_eq!(json["event"], "enrollment_booked");
    }
}
