//! Low-stock reconciliation: open alerts, notify admins, auto-resolve.

use std::sync::Arc;

use serde::Serialize;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::Clock;
use storewatch_core::types::{AlertStatus, LowStockAlert};

use crate::dispatch::{ChatDispatch, NotificationDispatcher};
use crate::persistence::EngineDb;
use crate::templates;

pub const MANUAL_RESOLVE_NOTE: &str = "Stock replenished";
pub const AUTO_RESOLVE_NOTE: &str = "Auto-resolved: stock replenished";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StockScanStats {
    pub alerts_created: u32,
    pub total_low_stock: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoResolveStats {
    pub resolved: u32,
}

/// Who hears about low stock.
#[derive(Debug, Clone, Default)]
pub struct StockAlertSettings {
    pub admin_emails: Vec<String>,
    pub admin_whatsapp: Vec<String>,
    pub admin_panel_url: String,
    pub store_name: String,
}

pub struct StockReconciler {
    db: Arc<EngineDb>,
    dispatcher: Arc<NotificationDispatcher>,
    chat: Option<Arc<dyn ChatDispatch>>,
    clock: Arc<dyn Clock>,
    settings: StockAlertSettings,
}

impl StockReconciler {
    pub fn new(
        db: Arc<EngineDb>,
        dispatcher: Arc<NotificationDispatcher>,
        chat: Option<Arc<dyn ChatDispatch>>,
        clock: Arc<dyn Clock>,
        settings: StockAlertSettings,
    ) -> Self {
        Self {
            db,
            dispatcher,
            chat,
            clock,
            settings,
        }
    }

    /// Open an alert for every low product without one, then send a single
    /// digest per admin recipient covering the new alerts.
    pub async fn check_low_stock_and_alert(&self) -> Result<StockScanStats> {
        let products = self.db.low_stock_products()?;
        tracing::info!("📊 {} product(s) at or below minimum stock", products.len());

        let mut created = Vec::new();
        for product in &products {
            match self.db.insert_pending_alert(product, self.clock.now()) {
                Ok(Some(alert)) => {
                    tracing::warn!(
                        "⚠️ Low stock alert for {} ({}/{})",
                        product.name,
                        product.stock,
                        product.minimum_stock
                    );
                    created.push(alert);
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to open alert for {}: {e}", product.id),
            }
        }

        if !created.is_empty() {
            self.notify_admins(&created).await;
        }

        Ok(StockScanStats {
            alerts_created: created.len() as u32,
            total_low_stock: products.len() as u32,
        })
    }

    async fn notify_admins(&self, alerts: &[LowStockAlert]) {
        if self.settings.admin_emails.is_empty() {
            tracing::warn!("No admin emails configured; {} alert(s) not mailed", alerts.len());
        }
        for to in &self.settings.admin_emails {
            let email = templates::low_stock_email(
                to,
                alerts,
                &self.settings.admin_panel_url,
                &self.settings.store_name,
            );
            let report = self.dispatcher.send_email(&email).await;
            if !report.success {
                tracing::error!(
                    "Low stock email to {to} failed: {}",
                    report.error.unwrap_or_default()
                );
            }
        }

        let Some(chat) = &self.chat else {
            return;
        };
        for phone in &self.settings.admin_whatsapp {
            let message = templates::low_stock_chat(phone, alerts, &self.settings.store_name);
            if let Err(e) = chat.enqueue_whatsapp(message).await {
                tracing::error!("Low stock WhatsApp to {phone} failed: {e}");
            }
        }
    }

    /// Resolve an alert by hand. Already resolved alerts come back as they are.
    pub fn resolve_low_stock_alert(
        &self,
        alert_id: &str,
        notes: Option<&str>,
    ) -> Result<LowStockAlert> {
        let alert = self
            .db
            .get_alert(alert_id)?
            .ok_or_else(|| StoreWatchError::NotFound(format!("alert {alert_id}")))?;
        if alert.status == AlertStatus::Resolved {
            return Ok(alert);
        }

        let notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(MANUAL_RESOLVE_NOTE);
        self.db.resolve_alert(alert_id, notes, self.clock.now())?;
        tracing::info!("✅ Alert {alert_id} resolved ({})", alert.product_name);

        self.db
            .get_alert(alert_id)?
            .ok_or_else(|| StoreWatchError::NotFound(format!("alert {alert_id}")))
    }

    /// Close pending alerts whose product is back above its minimum.
    pub fn auto_resolve_alerts(&self) -> Result<AutoResolveStats> {
        let pending = self.db.pending_alerts()?;
        let mut stats = AutoResolveStats::default();

        for alert in &pending {
            let product = match self.db.get_product(&alert.product_id) {
                Ok(Some(p)) => p,
                Ok(None) => {
                    tracing::warn!(
                        "Alert {} refers to unknown product {}",
                        alert.id,
                        alert.product_id
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to read product {}: {e}", alert.product_id);
                    continue;
                }
            };
            if product.stock <= product.minimum_stock {
                continue;
            }
            match self
                .db
                .resolve_alert(&alert.id, AUTO_RESOLVE_NOTE, self.clock.now())
            {
                Ok(true) => {
                    stats.resolved += 1;
                    tracing::info!(
                        "✅ Alert for {} auto-resolved (stock {})",
                        product.name,
                        product.stock
                    );
                }
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to auto-resolve alert {}: {e}", alert.id),
            }
        }
        Ok(stats)
    }

    pub fn list_pending_alerts(&self) -> Result<Vec<LowStockAlert>> {
        self.db.pending_alerts()
    }
}
