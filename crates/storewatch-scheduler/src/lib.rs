//! # StoreWatch Scheduler
//!
//! Background reconciliation and notification dispatch for the storefront.
//! Holds no timer of its own: every batch entry point is fired by an
//! external trigger (the `storewatch run` loop, or OS cron calling
//! `storewatch once`).
//!
//! ## Architecture
//! ```text
//! Trigger (interval / cron)
//!   ├── RecoveryScheduler: eligible carts → reminder email (5/10/15 %)
//!   ├── RecoveryScheduler: carts older than 7 days → expired
//!   ├── StockReconciler: stock ≤ minimum → pending alert → admin digest
//!   ├── StockReconciler: stock > minimum → alert auto-resolved
//!   └── QueueWorker: due chat jobs → ChatSender (retry with backoff)
//!
//! Storefront (request path)
//!   ├── CartLifecycleTracker: track_cart / mark_recovered
//!   └── ChatDispatch: enqueue_whatsapp → queued | sent directly
//!
//! NotificationDispatcher / ChatSender
//!   └── every attempt → message_audit (SQLite)
//! ```

pub mod carts;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod queue;
pub mod recovery;
pub mod stock;
pub mod templates;

pub use carts::CartLifecycleTracker;
pub use dispatch::{
    ChatDispatch, ChatSender, DirectChatDispatch, DispatchOutcome, NotificationDispatcher,
    QueuedChatDispatch, build_chat_dispatch,
};
pub use engine::{BatchJob, Engine, EngineParts, spawn_engine};
pub use persistence::EngineDb;
pub use queue::{JobEvent, QueueWorker, SqliteJobQueue, WorkerPass};
pub use recovery::{ExpireStats, RecoveryReceipt, RecoveryScheduler, RecoverySettings, RecoveryStats};
pub use stock::{AutoResolveStats, StockAlertSettings, StockReconciler, StockScanStats};
