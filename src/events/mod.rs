//! # Lifecycle Events
//!
//! Outbox for side effects that must never block a state transition:
//! attribution, analytics and human notification subscribe to the publisher
//! and react on their own tasks.

pub mod publisher;

pub use publisher::{EventPublisher, LifecycleEvent, PublishedEvent};
