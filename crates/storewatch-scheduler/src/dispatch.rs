//! Notification dispatch: actually sends email and chat messages.
//!
//! Email: one attempt per call, outcome returned as a [`DeliveryReport`].
//! Chat: every send goes through [`ChatSender::send`] (10s hard cap,
//! detached audit write, drained by [`ChatSender::flush_audit`] before the
//! process exits). Whether a chat message is sent now or handed to
//! the durable queue is decided once, in [`build_chat_dispatch`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use storewatch_core::config::QueueConfig;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::{ChatProvider, Clock, JobQueue, Mailer};
use storewatch_core::types::{
    AuditStatus, ChatMessage, ChatReceipt, DeliveryReport, EnqueueOptions, MessageAuditRecord,
    MessageChannel, OutgoingEmail,
};

use crate::persistence::EngineDb;

/// Job name used for every queued WhatsApp delivery.
pub const SEND_WHATSAPP_JOB: &str = "send-whatsapp";

/// Upper bound on a single chat provider call.
pub const CHAT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Email ─────────────────────────────────────────────────

/// Sends transactional email and records every attempt.
pub struct NotificationDispatcher {
    mailer: Option<Arc<dyn Mailer>>,
    db: Arc<EngineDb>,
    clock: Arc<dyn Clock>,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, db: Arc<EngineDb>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mailer: Some(mailer),
            db,
            clock,
        }
    }

    /// No mail provider configured: every send is a failed delivery.
    pub fn unconfigured(db: Arc<EngineDb>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mailer: None,
            db,
            clock,
        }
    }

    /// Single attempt, no retry. Provider failures become a failed report.
    pub async fn send_email(&self, email: &OutgoingEmail) -> DeliveryReport {
        let result = match &self.mailer {
            Some(mailer) => mailer.send_email(email).await,
            None => Err(StoreWatchError::Config("no email provider configured".into())),
        };
        let provider = self.mailer.as_ref().map(|m| m.name()).unwrap_or("none");
        let origin = self
            .mailer
            .as_ref()
            .map(|m| m.origin().to_string())
            .unwrap_or_default();

        let (report, status, response) = match result {
            Ok(id) => (DeliveryReport::sent(id.clone()), AuditStatus::Sent, Some(id)),
            Err(e) => {
                tracing::warn!("❌ Email to {} via {provider} failed: {e}", email.to);
                (
                    DeliveryReport::failed(e.to_string()),
                    AuditStatus::Failed,
                    Some(e.to_string()),
                )
            }
        };

        let record = MessageAuditRecord {
            channel: MessageChannel::Email,
            destination: email.to.clone(),
            origin,
            provider_id: report.id.clone(),
            template_id: None,
            body: Some(email.subject.clone()),
            status,
            response,
            created_at: self.clock.now(),
        };
        if let Err(e) = self.db.insert_audit(&record) {
            tracing::error!("Failed to write email audit record: {e}");
        }

        report
    }
}

// ─── Chat ──────────────────────────────────────────────────

/// Handles of audit writes still in flight.
#[derive(Default)]
struct PendingAudits {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PendingAudits {
    fn spawn(&self, db: Arc<EngineDb>, record: MessageAuditRecord) {
        let handle = tokio::spawn(async move {
            if let Err(e) = db.insert_audit(&record) {
                tracing::error!("Failed to write chat audit record: {e}");
            }
        });
        match self.handles.lock() {
            Ok(mut handles) => {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(e) => tracing::error!("Audit tracker poisoned: {e}"),
        }
    }

    async fn drain(&self) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(e) => {
                tracing::error!("Audit tracker poisoned: {e}");
                return;
            }
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Chat audit task failed: {e}");
            }
        }
    }
}

/// The one primitive that talks to the chat provider. Shared by the direct
/// path and the queue worker.
#[derive(Clone)]
pub struct ChatSender {
    provider: Arc<dyn ChatProvider>,
    db: Arc<EngineDb>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    audits: Arc<PendingAudits>,
}

impl ChatSender {
    pub fn new(provider: Arc<dyn ChatProvider>, db: Arc<EngineDb>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            db,
            clock,
            timeout: CHAT_SEND_TIMEOUT,
            audits: Arc::new(PendingAudits::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one message, giving up after the timeout. The audit record is
    /// written in the background and never affects the returned result.
    pub async fn send(&self, message: &ChatMessage) -> Result<ChatReceipt> {
        let outcome = tokio::time::timeout(self.timeout, self.provider.send(message)).await;

        let (result, status, response) = match outcome {
            Ok(Ok(receipt)) => {
                let raw = receipt.raw.to_string();
                (Ok(receipt), AuditStatus::Sent, Some(raw))
            }
            Ok(Err(e)) => {
                let text = e.to_string();
                (Err(e), AuditStatus::Failed, Some(text))
            }
            Err(_) => {
                let text = format!(
                    "{} send timed out after {}s",
                    self.provider.name(),
                    self.timeout.as_secs()
                );
                (
                    Err(StoreWatchError::Provider(text.clone())),
                    AuditStatus::Timeout,
                    Some(text),
                )
            }
        };

        let record = MessageAuditRecord {
            channel: MessageChannel::Whatsapp,
            destination: message.to.clone(),
            origin: message
                .from
                .clone()
                .unwrap_or_else(|| self.provider.origin().to_string()),
            provider_id: result.as_ref().ok().map(|r| r.id.clone()),
            template_id: message.template_id.clone(),
            body: message.audit_body(),
            status,
            response,
            created_at: self.clock.now(),
        };
        self.audits.spawn(self.db.clone(), record);

        match &result {
            Ok(receipt) => tracing::info!("📤 WhatsApp sent to {} ({})", message.to, receipt.id),
            Err(e) => tracing::warn!("❌ WhatsApp to {} failed: {e}", message.to),
        }
        result
    }

    /// Wait for every audit write started so far. Clones share the tracker.
    pub async fn flush_audit(&self) {
        self.audits.drain().await;
    }
}

/// What happened to a chat message handed to [`ChatDispatch`].
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Stored in the durable queue; a worker will deliver it.
    Queued { job_id: i64 },
    /// Delivered right away.
    Sent(ChatReceipt),
}

/// Uniform chat dispatch contract. Callers never know which path served them.
#[async_trait]
pub trait ChatDispatch: Send + Sync {
    /// "queued" or "direct".
    fn mode(&self) -> &str;

    async fn enqueue_whatsapp(&self, message: ChatMessage) -> Result<DispatchOutcome>;
}

/// Sends immediately.
pub struct DirectChatDispatch {
    sender: ChatSender,
}

impl DirectChatDispatch {
    pub fn new(sender: ChatSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ChatDispatch for DirectChatDispatch {
    fn mode(&self) -> &str {
        "direct"
    }

    async fn enqueue_whatsapp(&self, message: ChatMessage) -> Result<DispatchOutcome> {
        self.sender.send(&message).await.map(DispatchOutcome::Sent)
    }
}

/// Enqueues with retry options; falls back to a direct send when the queue
/// rejects the job.
pub struct QueuedChatDispatch {
    queue: Arc<dyn JobQueue>,
    sender: ChatSender,
    options: EnqueueOptions,
}

impl QueuedChatDispatch {
    pub fn new(queue: Arc<dyn JobQueue>, sender: ChatSender, options: EnqueueOptions) -> Self {
        Self {
            queue,
            sender,
            options,
        }
    }
}

#[async_trait]
impl ChatDispatch for QueuedChatDispatch {
    fn mode(&self) -> &str {
        "queued"
    }

    async fn enqueue_whatsapp(&self, message: ChatMessage) -> Result<DispatchOutcome> {
        match self
            .queue
            .enqueue(SEND_WHATSAPP_JOB, &message, self.options)
            .await
        {
            Ok(job_id) => {
                tracing::debug!("📥 WhatsApp to {} queued as job {job_id}", message.to);
                Ok(DispatchOutcome::Queued { job_id })
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Queue {} unavailable ({e}), sending WhatsApp directly",
                    self.queue.name()
                );
                self.sender.send(&message).await.map(DispatchOutcome::Sent)
            }
        }
    }
}

/// Pick the chat dispatch path once, at startup.
pub fn build_chat_dispatch(
    config: &QueueConfig,
    queue: Option<Arc<dyn JobQueue>>,
    sender: ChatSender,
) -> Arc<dyn ChatDispatch> {
    match queue {
        Some(queue) if config.enabled => {
            tracing::info!("📬 Chat dispatch: queued via {}", queue.name());
            Arc::new(QueuedChatDispatch::new(
                queue,
                sender,
                EnqueueOptions {
                    attempts: config.attempts,
                    backoff_base_ms: config.backoff_base_ms,
                },
            ))
        }
        _ => {
            tracing::info!("📬 Chat dispatch: direct");
            Arc::new(DirectChatDispatch::new(sender))
        }
    }
}
