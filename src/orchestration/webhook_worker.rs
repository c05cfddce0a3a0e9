//! Webhook event queue consumer.
//!
//! Polls the webhook event queue and hands each job to the
//! [`EnrollmentEventProcessor`] with bounded parallelism. A job is acked once
//! it has been handled; a processing failure leaves it unacked so the queue
//! redelivers it after the visibility timeout; the call slot held by a
//! redelivered call outcome is released only once. Payloads that cannot be decoded
//! are acked after releasing the call slot a malformed call outcome may still
//! hold, since redelivery cannot fix them.

use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::event_processor::EnrollmentEventProcessor;
use crate::config::QueuesConfig;
use crate::messaging::{JobQueue, MessagingResult, QueuedJob, WebhookEventJob};

/// What became of one dequeued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Acked,
    Malformed,
    /// Left on the queue for redelivery
    Retry,
}

/// Counts for one poll of the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub acked: usize,
    pub malformed: usize,
    pub retried: usize,
}

impl PollSummary {
    fn record(&mut self, disposition: JobDisposition) {
        match disposition {
            JobDisposition::Acked => self.acked += 1,
            JobDisposition::Malformed => self.malformed += 1,
            JobDisposition::Retry => self.retried += 1,
        }
    }
}

pub struct WebhookWorker {
    queue: Arc<dyn JobQueue>,
    processor: Arc<EnrollmentEventProcessor>,
    queues: QueuesConfig,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for WebhookWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookWorker")
            .field("queue", &self.queues.webhook_events)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl WebhookWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<EnrollmentEventProcessor>,
        queues: QueuesConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            processor,
            queues,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Dequeue one batch and wait for every job in it
    pub async fn poll_once(&self) -> MessagingResult<PollSummary> {
        let jobs = self
            .queue
            .dequeue(
                &self.queues.webhook_events,
                self.queues.visibility_timeout_seconds,
                self.queues.batch_size,
            )
            .await?;

        let mut summary = PollSummary {
            received: jobs.len(),
            ..PollSummary::default()
        };
        if jobs.is_empty() {
            return Ok(summary);
        }

        let mut tasks = JoinSet::new();
        for job in jobs {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let queue_name = self.queues.webhook_events.clone();
            tasks.spawn(async move {
                let _permit = permit;
                process_job(queue.as_ref(), &processor, &queue_name, job).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(disposition) => summary.record(disposition),
                Err(e) => {
                    error!(error = %e, "Webhook job task panicked");
                    summary.record(JobDisposition::Retry);
                }
            }
        }

        debug!(
            received = summary.received,
            acked = summary.acked,
            malformed = summary.malformed,
            retried = summary.retried,
            "Webhook poll complete"
        );
        Ok(summary)
    }

    /// Poll until `shutdown` turns true. Full batches are followed by an
    /// immediate poll; an empty queue waits for the poll interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queues.webhook_events,
            concurrency = self.permits.available_permits(),
            "Webhook worker started"
        );

        while !*shutdown.borrow() {
            let received = match self.poll_once().await {
                Ok(summary) => summary.received,
                Err(e) => {
                    error!(error = %e, "Webhook queue poll failed");
                    0
                }
            };
            if received > 0 {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.queues.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(queue = %self.queues.webhook_events, "Webhook worker stopped");
    }
}

async fn process_job(
    queue: &dyn JobQueue,
    processor: &EnrollmentEventProcessor,
    queue_name: &str,
    job: QueuedJob,
) -> JobDisposition {
    let event = match serde_json::from_value::<WebhookEventJob>(job.payload.clone()) {
        Ok(event) => event,
        Err(e) => {
            warn!(msg_id = job.msg_id, error = %e, "Malformed webhook event");
            processor
                .release_call_slot_from_raw(Some(job.msg_id), &job.payload)
                .await;
            return match ack(queue, queue_name, job.msg_id).await {
                true => JobDisposition::Malformed,
                false => JobDisposition::Retry,
            };
        }
    };

    match processor.handle_queued(job.msg_id, &event).await {
        Ok(_) => match ack(queue, queue_name, job.msg_id).await {
            true => JobDisposition::Acked,
            false => JobDisposition::Retry,
        },
        Err(e) => {
            error!(
                msg_id = job.msg_id,
                read_ct = job.read_ct,
                event_type = event.event.event_type(),
                enrollment_id = ?event.enrollment_id,
                error = %e,
                "Webhook event failed; leaving for redelivery"
            );
            JobDisposition::Retry
        }
    }
}

async fn ack(queue: &dyn JobQueue, queue_name: &str, msg_id: i64) -> bool {
    match queue.ack(queue_name, msg_id).await {
        Ok(()) => true,
        Err(e) => {
            error!(msg_id = msg_id, error = %e, "Failed to ack webhook job");
            false
        }
    }
}
