//! Mail provider contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::OutgoingEmail;

/// Transactional email provider (Resend, SMTP, ...).
///
/// One attempt per call; no retries. Returns the provider's message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &str;

    /// Sender address as it appears in the audit trail.
    fn origin(&self) -> &str;

    async fn send_email(&self, email: &OutgoingEmail) -> Result<String>;
}
