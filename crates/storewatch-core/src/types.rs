//! Domain records shared across crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Carts ──────────────────────────────────────────────────

/// Who owns a cart. The email is the business key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl CustomerIdentity {
    pub fn guest(email: &str) -> Self {
        Self {
            email: email.to_string(),
            name: None,
            user_id: None,
        }
    }
}

/// One line of the cart snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: u32,
    pub price: f64,
}

/// Cart lifecycle. Only `Abandoned` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    Abandoned,
    Recovered,
    Expired,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abandoned => "abandoned",
            Self::Recovered => "recovered",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "abandoned" => Some(Self::Abandoned),
            "recovered" => Some(Self::Recovered),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Persisted snapshot of a cart that has not produced an order yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonedCart {
    pub id: String,
    pub user_email: String,
    pub user_name: Option<String>,
    pub user_id: Option<String>,
    pub items: Vec<CartItem>,
    pub total: f64,
    pub abandoned_at: DateTime<Utc>,
    pub status: CartStatus,
    pub reminder_count: u32,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub recovery_token: String,
    pub recovery_discount: Option<u32>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub recovered_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Inventory ──────────────────────────────────────────────

/// Catalog read model. Owned by the catalog, only read by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub stock: i64,
    pub minimum_stock: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn is_low(&self) -> bool {
        self.stock <= self.minimum_stock
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub current_stock: i64,
    pub minimum_stock: i64,
    pub threshold_level: i64,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

// ─── Messaging ──────────────────────────────────────────────

/// Email handed to a [`crate::traits::Mailer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Chat-channel message: either a template with variables or a raw body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Free-form caller context, carried through the queue untouched.
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn text(to: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    pub fn template(to: &str, template_id: &str, variables: BTreeMap<String, String>) -> Self {
        Self {
            to: to.to_string(),
            template_id: Some(template_id.to_string()),
            variables,
            ..Default::default()
        }
    }

    /// Body text as it should appear in the audit trail.
    pub fn audit_body(&self) -> Option<String> {
        if let Some(body) = &self.body {
            return Some(body.clone());
        }
        if self.variables.is_empty() {
            None
        } else {
            serde_json::to_string(&self.variables).ok()
        }
    }
}

/// What the chat provider answered for an accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReceipt {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Outcome of a single email dispatch. Never an error: failures are data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub success: bool,
    pub id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn sent(id: String) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error),
        }
    }
}

// ─── Audit ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageChannel {
    Email,
    Whatsapp,
}

impl MessageChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Sent,
    Failed,
    Timeout,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Append-only record of one dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAuditRecord {
    pub channel: MessageChannel,
    pub destination: String,
    pub origin: String,
    pub provider_id: Option<String>,
    pub template_id: Option<String>,
    pub body: Option<String>,
    pub status: AuditStatus,
    /// Raw provider response on success, error text on failure.
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─── Queue ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Retry policy attached to a job at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 5_000,
        }
    }
}

impl EnqueueOptions {
    /// Exponential delay before retry number `attempt` (1-based):
    /// base, 2×base, 4×base, ...
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        std::time::Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exp))
    }
}

/// A chat delivery job as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: i64,
    pub job_name: String,
    pub message: ChatMessage,
    pub attempts: u32,
    pub options: EnqueueOptions,
    pub status: JobStatus,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
}
