//! # Enrollment Model
//!
//! One contact's run through one sequence. Owned by the tenant, created on lead
//! ingestion and mutated only by the event processor and healing executor.
//!
//! ## Step cursor
//!
//! `current_step` is the order index of the step most recently dispatched. The
//! external scheduler dispatches `current_step + 1` once `next_step_at` has
//! passed, so healing rewinds the cursor to retry a step and advances it to
//! skip one.
//!
//! ## Concurrency
//!
//! `version` is bumped on every successful store update; writers holding a
//! stale copy get a version conflict instead of silently losing an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::channel::{Channel, ChannelOverrideMap};
use super::healing::{HealingActionKind, HealingHistoryEntry};
use crate::state_machine::EnrollmentStatus;

/// Conversion recorded when an enrollment ends in a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    pub converted_at: DateTime<Utc>,
    pub source: String,
    pub call_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    pub status: EnrollmentStatus,
    pub current_step: i32,
    pub next_step_at: Option<DateTime<Utc>>,
    pub channel_overrides: ChannelOverrideMap,
    pub failed_channels: BTreeSet<Channel>,
    pub healing_history: Vec<HealingHistoryEntry>,
    pub needs_human_intervention: bool,
    pub contact_replied: bool,
    pub call_count: i32,
    pub last_call_disposition: Option<String>,
    pub last_engagement_at: Option<DateTime<Utc>>,
    pub conversion: Option<ConversionMetadata>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(tenant_id: Uuid, contact_id: Uuid, sequence_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            enrollment_id: Uuid::new_v4(),
            tenant_id,
            contact_id,
            sequence_id,
            status: EnrollmentStatus::Active,
            current_step: 0,
            next_step_at: Some(now),
            channel_overrides: ChannelOverrideMap::new(),
            failed_channels: BTreeSet::new(),
            healing_history: Vec::new(),
            needs_human_intervention: false,
            contact_replied: false,
            call_count: 0,
            last_call_disposition: None,
            last_engagement_at: None,
            conversion: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Channel a step authored for `channel` is actually sent on
    pub fn effective_channel(&self, channel: Channel) -> Channel {
        self.channel_overrides.resolve(channel)
    }

    /// Order index of the step the scheduler sends next
    pub fn next_step_order(&self) -> i32 {
        self.current_step + 1
    }

    /// Adds a channel to the failed set; returns false if it was already there
    pub fn mark_channel_failed(&mut self, channel: Channel) -> bool {
        self.failed_channels.insert(channel)
    }

    /// Number of `extend_delay` rewinds already applied to `step_order`
    pub fn rewinds_for_step(&self, step_order: i32) -> u32 {
        self.healing_history
            .iter()
            .filter(|entry| {
                entry.step_order == step_order && entry.action_type == HealingActionKind::ExtendDelay
            })
            .count() as u32
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
