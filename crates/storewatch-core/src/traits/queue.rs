//! Durable job queue contract for chat deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ChatMessage, EnqueueOptions, JobStatus, NotificationJob, QueueStats};

/// At-least-once job queue.
///
/// `claim_due` hands a job to exactly one worker pass; the worker must
/// finish it with `ack` or `fail`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Store a job and return its id.
    async fn enqueue(
        &self,
        job_name: &str,
        message: &ChatMessage,
        options: EnqueueOptions,
    ) -> Result<i64>;

    /// Claim the oldest job that is due at `now`, if any.
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<NotificationJob>>;

    /// Mark a claimed job as delivered.
    async fn ack(&self, id: i64, now: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt. Returns `Queued` when the job was
    /// rescheduled with backoff, `Failed` once attempts are exhausted.
    async fn fail(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<JobStatus>;

    async fn stats(&self) -> Result<QueueStats>;
}
