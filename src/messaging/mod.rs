//! # Messaging Module
//!
//! Job queue plumbing for the outreach core: wire formats of the send and
//! webhook event jobs, the `JobQueue` abstraction with in-memory and PGMQ
//! implementations, and the channel content transcoder used when a step is
//! sent on a channel other than the one it was written for.

pub mod errors;
pub mod message;
pub mod queue;
pub mod transcoder;

pub use errors::{MessagingError, MessagingResult};
pub use message::{
    AssistantConfig, CallDisposition, DeliveryStatus, EmailSendJob, OutboundJob, ReplyIntent,
    SmsSendJob, VoiceCallJob, WebhookEvent, WebhookEventJob,
};
pub use queue::{enqueue_json, InMemoryJobQueue, JobQueue, PgmqJobQueue, QueuedJob};
pub use transcoder::{personalize, strip_html, ContentTranscoder, RenderedContent, Transcoder};
