//! # System Constants
//!
//! Fixed thresholds, delays, queue names and canned templates that define the
//! operational boundaries of the outreach orchestration core.
//!
//! Diagnosis thresholds are deliberately constants rather than configuration:
//! every tenant gets the same healing behaviour.

use std::time::Duration;

/// Lifecycle event names published on the [`crate::events::EventPublisher`]
pub mod events {
    pub const ENROLLMENT_BOOKED: &str = "enrollment.booked";
    pub const ENROLLMENT_REPLIED: &str = "enrollment.replied";
    pub const ENROLLMENT_TERMINATED: &str = "enrollment.terminated";
    pub const HEALING_APPLIED: &str = "healing.applied";
}

/// Default job queue names, overridable through `[queues]` configuration
pub mod queues {
    pub const SMS_SEND: &str = "outreach_sms_send";
    pub const EMAIL_SEND: &str = "outreach_email_send";
    pub const VOICE_CALL: &str = "outreach_voice_call";
    pub const WEBHOOK_EVENTS: &str = "outreach_webhook_events";
}

/// Delays (seconds) and prior-failure thresholds used by the diagnosis engine
pub mod diagnosis {
    pub const SMS_FIRST_FAILURE_DELAY_SECONDS: u64 = 300;
    pub const SMS_REPEAT_FAILURE_DELAY_SECONDS: u64 = 600;
    pub const SMS_EMAIL_SWITCH_MIN_PRIOR: usize = 1;
    pub const SMS_VOICE_SWITCH_MIN_PRIOR: usize = 2;

    pub const EMAIL_BOUNCE_RETRY_DELAY_SECONDS: u64 = 3600;
    pub const EMAIL_BOUNCE_INVALID_MIN_PRIOR: usize = 1;

    pub const CALL_NO_ANSWER_RETRY_DELAY_SECONDS: u64 = 7200;
    pub const CALL_NO_ANSWER_OVERRIDE_MIN_PRIOR: usize = 2;
    pub const CALL_BUSY_DELAY_SECONDS: u64 = 900;
    pub const CALL_FAILED_REQUEUE_DELAY_SECONDS: u64 = 3600;
}

/// Delay before the next step when a failing step is skipped
pub const SKIP_AND_ADVANCE_DELAY_SECONDS: i64 = 60;

/// Upper bound on any healing delay
pub const MAX_HEALING_DELAY_SECONDS: i64 = 30 * 24 * 3600;

/// Maximum characters of SMS body after transcoding
pub const SMS_MAX_CHARS: usize = 1600;

/// Time-to-live for cached umbrella mappings
pub const UMBRELLA_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default capacity of the umbrella cache
pub const UMBRELLA_CACHE_MAX_CAPACITY: u64 = 10_000;

/// How long a released call is remembered, bounding duplicate releases
/// from redelivered call outcomes
pub const RELEASED_CALL_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Upper bound on remembered call releases
pub const RELEASED_CALL_MAX_ENTRIES: u64 = 100_000;

/// Re-runs of an event handler after an optimistic version conflict
pub const MAX_VERSION_CONFLICT_RETRIES: u32 = 3;

/// Default bound on `extend_delay` rewinds of the same step
pub const DEFAULT_MAX_STEP_REWINDS: u32 = 5;

/// Urgency used for voice jobs whose step does not specify one
pub const DEFAULT_VOICE_URGENCY_PRIORITY: i32 = 5;

/// Subject for email content transcoded from another channel
pub const TRANSCODED_EMAIL_SUBJECT: &str = "Following up";

/// System prompt for voice content transcoded from another channel
pub const TRANSCODED_VOICE_SYSTEM_PROMPT: &str = "You are a friendly, concise assistant calling on behalf of the business. \
Open with the provided first message, answer questions briefly and offer to book a time that works for the contact.";

/// Fallback SMS sent after a first unanswered call
pub const CALL_NO_ANSWER_FALLBACK_TEMPLATE: &str =
    "Hi {{first_name}}, I just tried calling you. Is there a better time to chat? Feel free to reply here.";

/// Fallback SMS sent when a call could not be placed
pub const CALL_FAILED_FALLBACK_TEMPLATE: &str =
    "Hi {{first_name}}, we tried to reach you by phone but couldn't get through. Reply here or let us know the best way to reach you.";

/// Greeting used when a contact has no usable name
pub const FALLBACK_FIRST_NAME: &str = "there";

/// Carrier-standard opt-out keywords
pub const OPT_OUT_KEYWORDS: &[&str] = &["stop", "stopall", "unsubscribe", "cancel", "end", "quit"];
