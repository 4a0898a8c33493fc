//! StoreWatch configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreWatchError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreWatchConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Base URL of the storefront, used to build recovery links.
    #[serde(default = "default_frontend_url")]
    pub frontend_base_url: String,
    #[serde(default = "default_admin_panel_url")]
    pub admin_panel_url: String,
    #[serde(default = "default_store_name")]
    pub store_name: String,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub recovery: RecoveryPolicy,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_database_path() -> String { "~/.storewatch/storewatch.db".into() }
fn default_frontend_url() -> String { "http://localhost:3000".into() }
fn default_admin_panel_url() -> String { "http://localhost:3000/admin".into() }
fn default_store_name() -> String { "StoreWatch Shop".into() }

impl Default for StoreWatchConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            frontend_base_url: default_frontend_url(),
            admin_panel_url: default_admin_panel_url(),
            store_name: default_store_name(),
            email: EmailConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            queue: QueueConfig::default(),
            alerts: AlertsConfig::default(),
            recovery: RecoveryPolicy::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl StoreWatchConfig {
    /// Load config from the default path (~/.storewatch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreWatchError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StoreWatchError::Config(format!("Failed to parse config: {e}")))?;
        config.recovery.validate()?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the StoreWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".storewatch")
    }

    /// Database path with `~` expanded.
    pub fn resolved_database_path(&self) -> PathBuf {
        expand_path(&self.database_path)
    }

    /// Overlay secrets and deployment settings from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay settings from any key/value source (env-like names).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RESEND_API_KEY") {
            self.email.resend_api_key = v;
        }
        if let Some(v) = get("RESEND_FROM_EMAIL") {
            self.email.from_email = v;
        }
        if let Some(v) = get("RESEND_FROM_NAME") {
            self.email.from_name = v;
        }
        if let Some(v) = get("SMTP_PASSWORD") {
            self.email.smtp_password = v;
        }
        if let Some(v) = get("WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = v;
        }
        if let Some(v) = get("WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = v;
        }
        if let Some(v) = get("ADMIN_NOTIFICATION_EMAILS") {
            self.alerts.admin_emails = split_list(&v);
        }
        if let Some(v) = get("ADMIN_NOTIFICATION_WHATSAPP") {
            self.alerts.admin_whatsapp = split_list(&v);
        }
        if let Some(v) = get("STOREWATCH_FRONTEND_URL") {
            self.frontend_base_url = v;
        }
        if let Some(v) = get("STOREWATCH_QUEUE_PATH") {
            self.queue.enabled = true;
            self.queue.database_path = Some(v);
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Which transactional email provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProviderKind {
    Resend,
    Smtp,
}

/// Email provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_provider")]
    pub provider: EmailProviderKind,
    #[serde(default)]
    pub resend_api_key: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
}

fn default_email_provider() -> EmailProviderKind { EmailProviderKind::Resend }
fn default_from_email() -> String { "noreply@localhost".into() }
fn default_from_name() -> String { "StoreWatch".into() }
fn default_smtp_port() -> u16 { 587 }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_email_provider(),
            resend_api_key: String::new(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
        }
    }
}

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Facebook Graph API access token
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID (the sender)
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
    #[serde(default = "default_template_language")]
    pub template_language: String,
    /// Hard cap on a single provider call.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_graph_version() -> String { "v21.0".into() }
fn default_template_language() -> String { "pt_PT".into() }
fn default_send_timeout() -> u64 { 10 }

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: String::new(),
            phone_number_id: String::new(),
            api_version: default_graph_version(),
            template_language: default_template_language(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// Durable chat queue. Disabled or unreachable ⇒ messages are sent directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 5_000 }
fn default_poll_interval() -> u64 { 5 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_path: None,
            attempts: default_attempts(),
            backoff_base_ms: default_backoff_ms(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Admin recipients for stock alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub admin_emails: Vec<String>,
    /// WhatsApp numbers (E.164) that also get a summary message.
    #[serde(default)]
    pub admin_whatsapp: Vec<String>,
}

/// Abandoned-cart reminder policy. Defaults are the production values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Minimum cart inactivity before the first reminder.
    #[serde(default = "default_min_idle")]
    pub min_idle_minutes: i64,
    /// Carts older than this are never reminded.
    #[serde(default = "default_max_age")]
    pub max_age_hours: i64,
    /// Minimum gap between two reminders for the same cart.
    #[serde(default = "default_cooldown")]
    pub cooldown_hours: i64,
    #[serde(default = "default_max_reminders")]
    pub max_reminders: u32,
    #[serde(default = "default_expire_days")]
    pub expire_after_days: i64,
    /// Discount percent indexed by reminders already sent.
    #[serde(default = "default_discounts")]
    pub discounts: Vec<u32>,
}

fn default_min_idle() -> i64 { 60 }
fn default_max_age() -> i64 { 72 }
fn default_cooldown() -> i64 { 24 }
fn default_max_reminders() -> u32 { 3 }
fn default_expire_days() -> i64 { 7 }
fn default_discounts() -> Vec<u32> { vec![5, 10, 15] }

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            min_idle_minutes: default_min_idle(),
            max_age_hours: default_max_age(),
            cooldown_hours: default_cooldown(),
            max_reminders: default_max_reminders(),
            expire_after_days: default_expire_days(),
            discounts: default_discounts(),
        }
    }
}

/// Upper bound for every policy window.
const MAX_POLICY_DAYS: i64 = 3650;

impl RecoveryPolicy {
    /// Reject windows that are negative or too large to subtract from a date.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("min_idle_minutes", self.min_idle_minutes, MAX_POLICY_DAYS * 24 * 60),
            ("max_age_hours", self.max_age_hours, MAX_POLICY_DAYS * 24),
            ("cooldown_hours", self.cooldown_hours, MAX_POLICY_DAYS * 24),
            ("expire_after_days", self.expire_after_days, MAX_POLICY_DAYS),
        ];
        for (name, value, max) in windows {
            if !(0..=max).contains(&value) {
                return Err(StoreWatchError::Config(format!(
                    "recovery.{name} must be between 0 and {max}, got {value}"
                )));
            }
        }
        if let Some(pct) = self.discounts.iter().find(|p| **p > 100) {
            return Err(StoreWatchError::Config(format!(
                "recovery.discounts entries must be at most 100, got {pct}"
            )));
        }
        Ok(())
    }

    // Accessors clamp so a policy built in code can never overflow chrono.

    pub fn min_idle(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.min_idle_minutes.clamp(0, MAX_POLICY_DAYS * 24 * 60))
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_age_hours.clamp(0, MAX_POLICY_DAYS * 24))
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours.clamp(0, MAX_POLICY_DAYS * 24))
    }

    pub fn expire_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.expire_after_days.clamp(0, MAX_POLICY_DAYS))
    }

    /// Discount for the next reminder, 0 once the table is exhausted.
    pub fn discount_for(&self, reminder_count: u32) -> u32 {
        if reminder_count >= self.max_reminders {
            return 0;
        }
        self.discounts
            .get(reminder_count as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Interval for the built-in trigger loop (`storewatch run`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Run every batch job once right after startup.
    #[serde(default = "bool_true")]
    pub run_on_start: bool,
}

fn default_interval() -> u64 { 3600 }
fn bool_true() -> bool { true }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            run_on_start: true,
        }
    }
}
