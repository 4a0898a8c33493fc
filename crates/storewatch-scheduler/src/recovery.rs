//! Abandoned cart reminders: eligibility scan, discount ladder, expiry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use storewatch_core::config::RecoveryPolicy;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::Clock;
use storewatch_core::types::{AbandonedCart, CartStatus};

use crate::dispatch::NotificationDispatcher;
use crate::persistence::EngineDb;
use crate::templates;

/// Result of one successful reminder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryReceipt {
    pub success: bool,
    pub discount_percent: u32,
    pub discount_amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub sent: u32,
    pub failed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpireStats {
    pub count: u32,
}

/// Where recovery links point and what the store calls itself.
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub frontend_base_url: String,
    pub store_name: String,
    pub policy: RecoveryPolicy,
}

/// Sends reminder emails for abandoned carts.
pub struct RecoveryScheduler {
    db: Arc<EngineDb>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    settings: RecoverySettings,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the in-flight slot for a cart when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.id);
        }
    }
}

impl RecoveryScheduler {
    pub fn new(
        db: Arc<EngineDb>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            db,
            dispatcher,
            clock,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Carts that may receive a reminder right now.
    pub fn find_carts_for_recovery(&self) -> Result<Vec<AbandonedCart>> {
        self.db
            .carts_due_for_reminder(self.clock.now(), &self.settings.policy)
    }

    fn claim(&self, cart_id: &str) -> Result<InFlight<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|e| StoreWatchError::ConcurrencyAnomaly(format!("in-flight lock: {e}")))?;
        if !set.insert(cart_id.to_string()) {
            return Err(StoreWatchError::ConcurrencyAnomaly(format!(
                "reminder for cart {cart_id} already in progress"
            )));
        }
        Ok(InFlight {
            set: &self.in_flight,
            id: cart_id.to_string(),
        })
    }

    /// Send one reminder. The cart is only updated after the email went out.
    pub async fn send_recovery_email(&self, cart_id: &str) -> Result<RecoveryReceipt> {
        let _guard = self.claim(cart_id)?;

        let cart = self
            .db
            .get_cart(cart_id)?
            .ok_or_else(|| StoreWatchError::NotFound(format!("cart {cart_id}")))?;
        if cart.status != CartStatus::Abandoned {
            return Err(StoreWatchError::Validation(format!(
                "cart {cart_id} is {}",
                cart.status.as_str()
            )));
        }

        let policy = &self.settings.policy;
        let discount_percent = policy.discount_for(cart.reminder_count);
        let discount_amount = templates::discount_amount(cart.total, discount_percent);
        let link = templates::recovery_link(&self.settings.frontend_base_url, &cart.recovery_token);
        let email =
            templates::recovery_email(&cart, discount_percent, &link, &self.settings.store_name);

        let report = self.dispatcher.send_email(&email).await;
        if !report.success {
            return Err(StoreWatchError::Provider(
                report
                    .error
                    .unwrap_or_else(|| "recovery email not delivered".into()),
            ));
        }

        let recorded = self.db.record_reminder(
            &cart.id,
            cart.reminder_count,
            discount_percent,
            policy.max_reminders,
            self.clock.now(),
        )?;
        if !recorded {
            tracing::warn!(
                "{}",
                StoreWatchError::ConcurrencyAnomaly(format!(
                    "cart {} changed while its reminder was sent; not counted twice",
                    cart.id
                ))
            );
        }

        tracing::info!(
            "📧 Recovery email sent to {} (reminder {}, discount {}%)",
            cart.user_email,
            cart.reminder_count + 1,
            discount_percent
        );
        Ok(RecoveryReceipt {
            success: true,
            discount_percent,
            discount_amount,
        })
    }

    /// Remind every eligible cart. One bad cart never stops the batch.
    pub async fn process_abandoned_carts(&self) -> Result<RecoveryStats> {
        let carts = self.find_carts_for_recovery()?;
        let mut stats = RecoveryStats {
            total: carts.len() as u32,
            ..Default::default()
        };
        tracing::info!("🛒 {} abandoned cart(s) eligible for a reminder", stats.total);

        for cart in &carts {
            match self.send_recovery_email(&cart.id).await {
                Ok(_) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!("Recovery email for cart {} failed: {e}", cart.id);
                }
            }
        }

        tracing::info!(
            "🛒 Recovery pass: {} sent, {} failed, {} total",
            stats.sent,
            stats.failed,
            stats.total
        );
        Ok(stats)
    }

    /// Expire carts abandoned longer than the policy allows.
    pub fn expire_old_carts(&self) -> Result<ExpireStats> {
        let now = self.clock.now();
        let cutoff = now - self.settings.policy.expire_after();
        let count = self.db.expire_carts(cutoff, now)? as u32;
        if count > 0 {
            tracing::info!("🗑️ {count} abandoned cart(s) expired");
        }
        Ok(ExpireStats { count })
    }
}
