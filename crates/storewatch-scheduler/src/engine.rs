//! Engine: wires the components together and runs the batch jobs.
//! The loop uses tokio::interval, so it sleeps between passes.

use std::sync::Arc;

use serde_json::json;
use storewatch_core::config::StoreWatchConfig;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::{ChatProvider, Clock, JobQueue, Mailer};
use storewatch_core::types::QueueStats;

use crate::carts::CartLifecycleTracker;
use crate::dispatch::{ChatDispatch, ChatSender, DispatchOutcome, NotificationDispatcher, build_chat_dispatch};
use crate::persistence::EngineDb;
use crate::queue::QueueWorker;
use crate::recovery::{RecoveryScheduler, RecoverySettings};
use crate::stock::{StockAlertSettings, StockReconciler};
use crate::templates;

/// Batch entry points an external trigger can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchJob {
    Recover,
    Expire,
    Stock,
    AutoResolve,
    Queue,
}

impl BatchJob {
    pub const ALL: [BatchJob; 5] = [
        BatchJob::Recover,
        BatchJob::Expire,
        BatchJob::Stock,
        BatchJob::AutoResolve,
        BatchJob::Queue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Recover => "recover",
            Self::Expire => "expire",
            Self::Stock => "stock",
            Self::AutoResolve => "auto-resolve",
            Self::Queue => "queue",
        }
    }
}

/// Collaborators built once at startup.
pub struct EngineParts {
    pub db: Arc<EngineDb>,
    /// `None` when email is not configured; sends then fail and are audited.
    pub mailer: Option<Arc<dyn Mailer>>,
    pub chat_provider: Option<Arc<dyn ChatProvider>>,
    pub queue: Option<Arc<dyn JobQueue>>,
    pub clock: Arc<dyn Clock>,
}

/// Every component, sharing one database handle and one clock.
pub struct Engine {
    pub tracker: CartLifecycleTracker,
    pub recovery: RecoveryScheduler,
    pub stock: StockReconciler,
    chat: Option<Arc<dyn ChatDispatch>>,
    sender: Option<ChatSender>,
    worker: Option<Arc<QueueWorker>>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl Engine {
    pub fn new(config: &StoreWatchConfig, parts: EngineParts) -> Self {
        let EngineParts {
            db,
            mailer,
            chat_provider,
            queue,
            clock,
        } = parts;

        let dispatcher = Arc::new(match mailer {
            Some(mailer) => NotificationDispatcher::new(mailer, db.clone(), clock.clone()),
            None => NotificationDispatcher::unconfigured(db.clone(), clock.clone()),
        });
        let sender = chat_provider.map(|provider| {
            let timeout = std::time::Duration::from_secs(config.whatsapp.send_timeout_secs.max(1));
            ChatSender::new(provider, db.clone(), clock.clone()).with_timeout(timeout)
        });

        let queue = queue.filter(|_| config.queue.enabled);
        let chat = sender
            .clone()
            .map(|s| build_chat_dispatch(&config.queue, queue.clone(), s));
        let worker = match (&queue, &sender) {
            (Some(q), Some(s)) => Some(Arc::new(QueueWorker::new(
                q.clone(),
                s.clone(),
                clock.clone(),
            ))),
            _ => None,
        };

        let recovery = RecoveryScheduler::new(
            db.clone(),
            dispatcher.clone(),
            clock.clone(),
            RecoverySettings {
                frontend_base_url: config.frontend_base_url.clone(),
                store_name: config.store_name.clone(),
                policy: config.recovery.clone(),
            },
        );
        let stock = StockReconciler::new(
            db.clone(),
            dispatcher,
            chat.clone(),
            clock.clone(),
            StockAlertSettings {
                admin_emails: config.alerts.admin_emails.clone(),
                admin_whatsapp: config.alerts.admin_whatsapp.clone(),
                admin_panel_url: config.admin_panel_url.clone(),
                store_name: config.store_name.clone(),
            },
        );

        Self {
            tracker: CartLifecycleTracker::new(db, clock),
            recovery,
            stock,
            chat,
            sender,
            worker,
            queue,
        }
    }

    /// Wait for background audit writes. Call before the runtime goes away.
    pub async fn shutdown(&self) {
        if let Some(sender) = &self.sender {
            sender.flush_audit().await;
        }
    }

    pub fn worker(&self) -> Option<Arc<QueueWorker>> {
        self.worker.clone()
    }

    /// Run one batch job and return its summary.
    pub async fn run_job(&self, job: BatchJob) -> Result<serde_json::Value> {
        let summary = match job {
            BatchJob::Recover => serde_json::to_value(self.recovery.process_abandoned_carts().await?)?,
            BatchJob::Expire => serde_json::to_value(self.recovery.expire_old_carts()?)?,
            BatchJob::Stock => serde_json::to_value(self.stock.check_low_stock_and_alert().await?)?,
            BatchJob::AutoResolve => serde_json::to_value(self.stock.auto_resolve_alerts()?)?,
            BatchJob::Queue => match &self.worker {
                Some(worker) => serde_json::to_value(worker.run_once().await?)?,
                None => json!({"skipped": "queue disabled"}),
            },
        };
        Ok(summary)
    }

    /// Run every batch job once. A failing job is reported, not fatal.
    pub async fn run_all(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for job in BatchJob::ALL {
            let value = match self.run_job(job).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!("❌ Batch job '{}' failed: {e}", job.name());
                    json!({"error": e.to_string(), "kind": e.kind()})
                }
            };
            out.insert(job.name().to_string(), value);
        }
        serde_json::Value::Object(out)
    }

    /// Send the order confirmation to the customer's WhatsApp.
    pub async fn notify_order(
        &self,
        phone: &str,
        order_number: &str,
        total: f64,
    ) -> Result<DispatchOutcome> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| StoreWatchError::Config("WhatsApp channel disabled".into()))?;
        chat.enqueue_whatsapp(templates::order_created_message(phone, order_number, total))
            .await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        match &self.queue {
            Some(q) => q.stats().await,
            None => Err(StoreWatchError::Config("queue disabled".into())),
        }
    }
}

/// Spawn the batch loop as a background tokio task body.
pub async fn spawn_engine(engine: Arc<Engine>, interval_secs: u64, run_on_start: bool) {
    tracing::info!("⏰ Batch loop started (every {}s)", interval_secs);

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    if !run_on_start {
        // The first tick completes immediately.
        interval.tick().await;
    }

    loop {
        interval.tick().await;
        let summary = engine.run_all().await;
        tracing::info!("📣 Batch pass complete: {summary}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{ChatBehavior, MockChat, MockMailer, t0};
    use crate::queue::SqliteJobQueue;
    use chrono::Duration;
    use storewatch_core::traits::ManualClock;
    use storewatch_core::types::{CartItem, CustomerIdentity, Product};

    fn engine(queue_enabled: bool) -> (Engine, Arc<EngineDb>, Arc<ManualClock>, Arc<MockChat>) {
        let mut config = StoreWatchConfig::default();
        config.queue.enabled = queue_enabled;
        config.alerts.admin_emails = vec!["ops@example.com".into()];

        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let chat = Arc::new(MockChat::new(ChatBehavior::Ok));
        let engine = Engine::new(
            &config,
            EngineParts {
                db: db.clone(),
                mailer: Some(Arc::new(MockMailer::default())),
                chat_provider: Some(chat.clone()),
                queue: Some(Arc::new(SqliteJobQueue::open_in_memory().unwrap())),
                clock: clock.clone(),
            },
        );
        (engine, db, clock, chat)
    }

    #[test]
    fn test_job_names() {
        let names: Vec<_> = BatchJob::ALL.iter().map(|j| j.name()).collect();
        assert_eq!(names, ["recover", "expire", "stock", "auto-resolve", "queue"]);
    }

    #[tokio::test]
    async fn test_run_all_reports_every_job() {
        let (engine, db, clock, _) = engine(false);
        engine
            .tracker
            .track_cart(
                &CustomerIdentity::guest("alice@example.com"),
                &[CartItem {
                    product_id: "p1".into(),
                    name: "Laptop".into(),
                    image: None,
                    quantity: 1,
                    price: 50_000.0,
                }],
                50_000.0,
            )
            .unwrap();
        db.upsert_product(&Product {
            id: "p1".into(),
            name: "Laptop".into(),
            sku: None,
            stock: 0,
            minimum_stock: 2,
            active: true,
        })
        .unwrap();
        clock.set(t0() + Duration::minutes(90));

        let summary = engine.run_all().await;
        assert_eq!(summary["recover"]["sent"], 1);
        assert_eq!(summary["expire"]["count"], 0);
        assert_eq!(summary["stock"]["alerts_created"], 1);
        assert_eq!(summary["auto-resolve"]["resolved"], 0);
        assert_eq!(summary["queue"]["skipped"], "queue disabled");
    }

    #[tokio::test]
    async fn test_notify_order_direct_and_queued() {
        let (direct, direct_db, _, chat) = engine(false);
        let outcome = direct.notify_order("+244900000000", "KZ-1", 100.0).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Sent(_)));
        assert_eq!(chat.sent.lock().unwrap().len(), 1);
        direct.shutdown().await;
        assert_eq!(direct_db.recent_audit(10).unwrap().len(), 1);
        assert!(direct.queue_stats().await.is_err());

        let (queued, _, _, chat) = engine(true);
        let outcome = queued.notify_order("+244900000000", "KZ-2", 100.0).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Queued { .. }));
        assert!(chat.sent.lock().unwrap().is_empty());
        assert_eq!(queued.queue_stats().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn test_notify_order_without_chat_is_config_error() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let engine = Engine::new(
            &StoreWatchConfig::default(),
            EngineParts {
                db,
                mailer: Some(Arc::new(MockMailer::default())),
                chat_provider: None,
                queue: None,
                clock: Arc::new(ManualClock::new(t0())),
            },
        );
        let err = engine.notify_order("+1", "KZ-3", 1.0).await.unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(engine.worker().is_none());
    }
}
