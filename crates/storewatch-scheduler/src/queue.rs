//! Durable chat delivery queue (SQLite) and its worker.
//!
//! Jobs move `queued → processing → sent`, or back to `queued` with
//! exponential backoff until attempts run out and they land in `failed`.
//! A `processing` job whose lock has expired (worker died mid-send) is
//! claimable again while it has attempts left, and `failed` otherwise.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tokio::sync::broadcast;

use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::{Clock, JobQueue};
use storewatch_core::types::{
    ChatMessage, EnqueueOptions, JobStatus, NotificationJob, QueueStats,
};

use crate::dispatch::ChatSender;
use crate::persistence::{db, parse_ts, ts};

/// How long a claimed job stays invisible to other workers.
pub const PROCESSING_LOCK: chrono::Duration = chrono::Duration::minutes(5);

const JOB_COLUMNS: &str = "id, job_name, payload, attempts, max_attempts, backoff_base_ms, \
     status, available_at, last_error, created_at";

/// SQLite-backed [`JobQueue`].
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
}

impl SqliteJobQueue {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db("Queue open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db("Queue open"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db("Busy timeout"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notification_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_name TEXT NOT NULL,
                payload TEXT NOT NULL,            -- JSON ChatMessage
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                backoff_base_ms INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                available_at TEXT NOT NULL,
                locked_until TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_due ON notification_jobs(status, available_at);",
        )
        .map_err(db("Queue migration"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreWatchError::Database(format!("Queue lock: {e}")))
    }

    pub fn get(&self, id: i64) -> Result<Option<NotificationJob>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM notification_jobs WHERE id = ?1"),
            [id],
            job_from_row,
        )
        .optional()
        .map_err(db("Get job"))
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn enqueue(
        &self,
        job_name: &str,
        message: &ChatMessage,
        options: EnqueueOptions,
    ) -> Result<i64> {
        let payload = serde_json::to_string(message)?;
        let now = ts(Utc::now());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notification_jobs
                 (job_name, payload, max_attempts, backoff_base_ms, status, available_at,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?5, ?5)",
            params![
                job_name,
                payload,
                options.attempts.max(1),
                options.backoff_base_ms as i64,
                now
            ],
        )
        .map_err(db("Enqueue"))?;
        Ok(conn.last_insert_rowid())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<NotificationJob>> {
        let conn = self.lock()?;
        let expired = conn
            .execute(
                "UPDATE notification_jobs
                 SET status = 'failed', last_error = 'lock expired', locked_until = NULL,
                     updated_at = ?1
                 WHERE status = 'processing' AND locked_until <= ?1
                   AND attempts >= max_attempts",
                params![ts(now)],
            )
            .map_err(db("Expire stale jobs"))?;
        if expired > 0 {
            tracing::warn!("💀 {expired} job(s) lost their worker on the last attempt");
        }
        conn.query_row(
            &format!(
                "UPDATE notification_jobs
                 SET status = 'processing', attempts = attempts + 1,
                     locked_until = ?2, updated_at = ?1
                 WHERE id = (
                     SELECT id FROM notification_jobs
                     WHERE (status = 'queued' AND available_at <= ?1)
                        OR (status = 'processing' AND locked_until <= ?1
                            AND attempts < max_attempts)
                     ORDER BY available_at, id
                     LIMIT 1
                 )
                 RETURNING {JOB_COLUMNS}"
            ),
            params![ts(now), ts(now + PROCESSING_LOCK)],
            job_from_row,
        )
        .optional()
        .map_err(db("Claim job"))
    }

    async fn ack(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE notification_jobs
                 SET status = 'sent', locked_until = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![ts(now), id],
            )
            .map_err(db("Ack job"))?;
        if changed == 0 {
            return Err(StoreWatchError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn fail(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<JobStatus> {
        let conn = self.lock()?;
        let (attempts, max_attempts, backoff_base_ms): (u32, u32, i64) = conn
            .query_row(
                "SELECT attempts, max_attempts, backoff_base_ms FROM notification_jobs WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .map_err(db("Load job"))?
            .ok_or_else(|| StoreWatchError::NotFound(format!("job {id}")))?;

        if attempts >= max_attempts {
            conn.execute(
                "UPDATE notification_jobs
                 SET status = 'failed', last_error = ?1, locked_until = NULL, updated_at = ?2
                 WHERE id = ?3",
                params![error, ts(now), id],
            )
            .map_err(db("Fail job"))?;
            return Ok(JobStatus::Failed);
        }

        let options = EnqueueOptions {
            attempts: max_attempts,
            backoff_base_ms: backoff_base_ms.max(0) as u64,
        };
        let delay = chrono::Duration::from_std(options.backoff_for(attempts))
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        conn.execute(
            "UPDATE notification_jobs
             SET status = 'queued', last_error = ?1, locked_until = NULL,
                 available_at = ?2, updated_at = ?3
             WHERE id = ?4",
            params![error, ts(now + delay), ts(now), id],
        )
        .map_err(db("Reschedule job"))?;
        Ok(JobStatus::Queued)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM notification_jobs GROUP BY status")
            .map_err(db("Prepare stats"))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
            .map_err(db("Query stats"))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row.map_err(db("Read stats"))?;
            let count = count.max(0) as u64;
            match JobStatus::parse(&status) {
                Some(JobStatus::Queued) => stats.queued = count,
                Some(JobStatus::Processing) => stats.processing = count,
                Some(JobStatus::Sent) => stats.sent = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => tracing::warn!("Unknown job status in queue: {status}"),
            }
        }
        Ok(stats)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationJob> {
    let payload: String = row.get(2)?;
    let message: ChatMessage = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_raw: String = row.get(6)?;
    let status = JobStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unexpected job status {status_raw}").into(),
        )
    })?;
    Ok(NotificationJob {
        id: row.get(0)?,
        job_name: row.get(1)?,
        message,
        attempts: row.get(3)?,
        options: EnqueueOptions {
            attempts: row.get(4)?,
            backoff_base_ms: row.get::<_, i64>(5)?.max(0) as u64,
        },
        status,
        available_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        last_error: row.get(8)?,
        created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
    })
}

// ─── Worker ────────────────────────────────────────────────

/// Broadcast after every processed job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Completed { job_id: i64, provider_id: String },
    Failed {
        job_id: i64,
        error: String,
        /// `Queued` when a retry is scheduled, `Failed` when it gave up,
        /// `Processing` when the outcome could not be recorded and the job
        /// waits for its lock to expire.
        next: JobStatus,
    },
}

/// Totals for one worker pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerPass {
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
}

/// Drains due jobs through [`ChatSender::send`].
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    sender: ChatSender,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<JobEvent>,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>, sender: ChatSender, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            queue,
            sender,
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Process every job that is due now. Individual job failures are
    /// recorded on the job and never abort the pass.
    pub async fn run_once(&self) -> Result<WorkerPass> {
        let mut pass = WorkerPass::default();

        while let Some(job) = self.queue.claim_due(self.clock.now()).await? {
            match self.sender.send(&job.message).await {
                Ok(receipt) => {
                    if let Err(e) = self.queue.ack(job.id, self.clock.now()).await {
                        tracing::error!("Failed to ack job {}: {e}", job.id);
                    }
                    pass.sent += 1;
                    let _ = self.events.send(JobEvent::Completed {
                        job_id: job.id,
                        provider_id: receipt.id,
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    let next = match self.queue.fail(job.id, &error, self.clock.now()).await {
                        Ok(next) => next,
                        Err(fail_err) => {
                            tracing::error!("Failed to record failure of job {}: {fail_err}", job.id);
                            JobStatus::Processing
                        }
                    };
                    match next {
                        JobStatus::Processing => pass.failed += 1,
                        JobStatus::Failed => {
                            pass.failed += 1;
                            tracing::error!(
                                "❌ Job {} ({}) failed after {} attempts: {error}",
                                job.id,
                                job.job_name,
                                job.attempts
                            );
                        }
                        _ => {
                            pass.retried += 1;
                            tracing::warn!(
                                "🔄 Job {} attempt {}/{} failed, retrying: {error}",
                                job.id,
                                job.attempts,
                                job.options.attempts
                            );
                        }
                    }
                    let _ = self.events.send(JobEvent::Failed {
                        job_id: job.id,
                        error,
                        next,
                    });
                }
            }
        }

        if pass != WorkerPass::default() {
            tracing::info!(
                "📨 Queue pass: {} sent, {} retried, {} failed",
                pass.sent,
                pass.retried,
                pass.failed
            );
        }
        Ok(pass)
    }

    /// Poll forever. Errors from the queue backend are logged and retried on
    /// the next tick.
    pub async fn run(self: Arc<Self>, poll_interval_secs: u64) {
        tracing::info!("📨 Queue worker started (poll every {}s)", poll_interval_secs);
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!("Queue worker pass failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{ChatBehavior, MockChat, t0};
    use crate::persistence::EngineDb;
    use storewatch_core::traits::ManualClock;

    fn options() -> EnqueueOptions {
        EnqueueOptions::default()
    }

    #[tokio::test]
    async fn test_claim_ack_flow() {
        let q = SqliteJobQueue::open_in_memory().unwrap();
        let id = q
            .enqueue("send-whatsapp", &ChatMessage::text("+1", "hi"), options())
            .await
            .unwrap();

        let now = Utc::now();
        let job = q.claim_due(now).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.message.body.as_deref(), Some("hi"));

        // Locked while processing.
        assert!(q.claim_due(now).await.unwrap().is_none());

        q.ack(id, now).await.unwrap();
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.queued + stats.processing, 0);
    }

    #[tokio::test]
    async fn test_backoff_then_terminal_failure() {
        let q = SqliteJobQueue::open_in_memory().unwrap();
        let id = q
            .enqueue("send-whatsapp", &ChatMessage::text("+1", "hi"), options())
            .await
            .unwrap();
        let now = Utc::now();

        q.claim_due(now).await.unwrap().unwrap();
        assert_eq!(q.fail(id, "boom", now).await.unwrap(), JobStatus::Queued);
        let job = q.get(id).unwrap().unwrap();
        assert_eq!(job.available_at, parse_ts(0, &ts(now + chrono::Duration::seconds(5))).unwrap());

        // Not due before the backoff elapses.
        assert!(q.claim_due(now + chrono::Duration::seconds(4)).await.unwrap().is_none());

        let second = now + chrono::Duration::seconds(5);
        q.claim_due(second).await.unwrap().unwrap();
        assert_eq!(q.fail(id, "boom", second).await.unwrap(), JobStatus::Queued);
        assert_eq!(
            q.get(id).unwrap().unwrap().available_at,
            parse_ts(0, &ts(second + chrono::Duration::seconds(10))).unwrap()
        );

        let third = second + chrono::Duration::seconds(10);
        q.claim_due(third).await.unwrap().unwrap();
        assert_eq!(q.fail(id, "boom", third).await.unwrap(), JobStatus::Failed);

        let job = q.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(q.claim_due(third + chrono::Duration::days(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_processing_job_is_reclaimed() {
        let q = SqliteJobQueue::open_in_memory().unwrap();
        q.enqueue("send-whatsapp", &ChatMessage::text("+1", "hi"), options())
            .await
            .unwrap();
        let now = Utc::now();
        q.claim_due(now).await.unwrap().unwrap();

        assert!(q.claim_due(now + chrono::Duration::minutes(4)).await.unwrap().is_none());
        let job = q
            .claim_due(now + chrono::Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_stale_job_on_last_attempt_is_not_resent() {
        let q = SqliteJobQueue::open_in_memory().unwrap();
        let id = q
            .enqueue("send-whatsapp", &ChatMessage::text("+1", "hi"), options())
            .await
            .unwrap();
        let now = Utc::now();

        q.claim_due(now).await.unwrap().unwrap();
        q.fail(id, "boom", now).await.unwrap();
        let second = now + chrono::Duration::seconds(5);
        q.claim_due(second).await.unwrap().unwrap();
        q.fail(id, "boom", second).await.unwrap();
        let third = second + chrono::Duration::seconds(10);
        let job = q.claim_due(third).await.unwrap().unwrap();
        assert_eq!(job.attempts, 3);

        // The worker dies mid-send; the lock runs out.
        let later = third + PROCESSING_LOCK;
        assert!(q.claim_due(later).await.unwrap().is_none());

        let job = q.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.last_error.as_deref(), Some("lock expired"));
        assert_eq!(q.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let q = SqliteJobQueue::open_in_memory().unwrap();
        assert_eq!(q.ack(42, Utc::now()).await.unwrap_err().kind(), "not_found");
        assert_eq!(q.fail(42, "x", Utc::now()).await.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn test_worker_delivers_and_broadcasts() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let queue = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let chat = Arc::new(MockChat::new(ChatBehavior::Ok));
        let sender = ChatSender::new(chat.clone(), db.clone(), clock.clone());
        let worker = QueueWorker::new(queue.clone(), sender.clone(), clock.clone());
        let mut events = worker.subscribe();

        queue
            .enqueue("send-whatsapp", &ChatMessage::text("+1", "one"), options())
            .await
            .unwrap();
        queue
            .enqueue("send-whatsapp", &ChatMessage::text("+2", "two"), options())
            .await
            .unwrap();
        clock.set(Utc::now() + chrono::Duration::seconds(1));

        let pass = worker.run_once().await.unwrap();
        assert_eq!(pass.sent, 2);
        assert_eq!(chat.sent.lock().unwrap().len(), 2);
        assert!(matches!(events.recv().await.unwrap(), JobEvent::Completed { .. }));
        assert!(matches!(events.recv().await.unwrap(), JobEvent::Completed { .. }));
        sender.flush_audit().await;
        assert_eq!(db.recent_audit(10).unwrap().len(), 2);
    }

    /// SQLite queue that cannot record failures.
    struct UnrecordableFailures(SqliteJobQueue);

    #[async_trait]
    impl JobQueue for UnrecordableFailures {
        fn name(&self) -> &str {
            "unrecordable"
        }
        async fn enqueue(&self, name: &str, message: &ChatMessage, options: EnqueueOptions) -> Result<i64> {
            self.0.enqueue(name, message, options).await
        }
        async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<NotificationJob>> {
            self.0.claim_due(now).await
        }
        async fn ack(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
            self.0.ack(id, now).await
        }
        async fn fail(&self, _: i64, _: &str, _: DateTime<Utc>) -> Result<JobStatus> {
            Err(StoreWatchError::Database("disk I/O error".into()))
        }
        async fn stats(&self) -> Result<QueueStats> {
            self.0.stats().await
        }
    }

    #[tokio::test]
    async fn test_unrecorded_failure_does_not_abort_the_pass() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let queue = Arc::new(UnrecordableFailures(SqliteJobQueue::open_in_memory().unwrap()));
        let clock = Arc::new(ManualClock::new(t0()));
        let chat = Arc::new(MockChat::new(ChatBehavior::Fail));
        let sender = ChatSender::new(chat, db.clone(), clock.clone());
        let worker = QueueWorker::new(queue.clone(), sender.clone(), clock.clone());
        let mut events = worker.subscribe();

        for to in ["+1", "+2"] {
            queue
                .enqueue("send-whatsapp", &ChatMessage::text(to, "x"), options())
                .await
                .unwrap();
        }
        clock.set(Utc::now() + chrono::Duration::seconds(1));

        let pass = worker.run_once().await.unwrap();
        assert_eq!(pass, WorkerPass { sent: 0, retried: 0, failed: 2 });
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                JobEvent::Failed { next, .. } => assert_eq!(next, JobStatus::Processing),
                other => panic!("unexpected event {other:?}"),
            }
        }
        // Both stay leased until the lock expires.
        assert_eq!(queue.stats().await.unwrap().processing, 2);
        sender.flush_audit().await;
        assert_eq!(db.recent_audit(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_worker_keeps_going_after_failures() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let queue = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let sender = ChatSender::new(
            Arc::new(MockChat::new(ChatBehavior::Fail)),
            db.clone(),
            clock.clone(),
        );
        let worker = QueueWorker::new(queue.clone(), sender, clock.clone());
        let mut events = worker.subscribe();

        // Enqueue stamps wall-clock time; move the manual clock past it.
        queue
            .enqueue("send-whatsapp", &ChatMessage::text("+1", "x"), options())
            .await
            .unwrap();
        clock.set(Utc::now() + chrono::Duration::seconds(1));

        let pass = worker.run_once().await.unwrap();
        assert_eq!(pass, WorkerPass { sent: 0, retried: 1, failed: 0 });
        match events.recv().await.unwrap() {
            JobEvent::Failed { next, .. } => assert_eq!(next, JobStatus::Queued),
            other => panic!("unexpected event {other:?}"),
        }

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(worker.run_once().await.unwrap().retried, 1);
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(worker.run_once().await.unwrap().failed, 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 0);
    }
}
