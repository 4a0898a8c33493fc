//! # StoreWatch Channels
//! Outbound provider implementations.
//!
//! - Email: Resend HTTP API or SMTP (lettre)
//! - Chat: WhatsApp Business Cloud API

pub mod email;
pub mod whatsapp;

use std::sync::Arc;

use storewatch_core::config::{EmailProviderKind, StoreWatchConfig};
use storewatch_core::error::Result;
use storewatch_core::traits::{ChatProvider, Mailer};

pub use email::{ResendMailer, SmtpMailer};
pub use whatsapp::WhatsAppChannel;

/// Build the configured mail provider.
/// Fails with `Config` when credentials are missing.
pub fn mailer_from_config(config: &StoreWatchConfig) -> Result<Arc<dyn Mailer>> {
    match config.email.provider {
        EmailProviderKind::Resend => Ok(Arc::new(ResendMailer::new(config.email.clone())?)),
        EmailProviderKind::Smtp => Ok(Arc::new(SmtpMailer::new(config.email.clone())?)),
    }
}

/// Build the WhatsApp provider, or `None` when the channel is disabled.
pub fn chat_provider_from_config(config: &StoreWatchConfig) -> Result<Option<Arc<dyn ChatProvider>>> {
    if !config.whatsapp.enabled {
        tracing::info!("WhatsApp channel disabled");
        return Ok(None);
    }
    let channel = WhatsAppChannel::new(config.whatsapp.clone())?;
    Ok(Some(Arc::new(channel)))
}
