//! Chat-channel provider contract (WhatsApp).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, ChatReceipt};

/// Sends one chat message. Used by both the direct path and the queue worker.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Default sender identity when the message does not override `from`.
    fn origin(&self) -> &str;

    async fn send(&self, message: &ChatMessage) -> Result<ChatReceipt>;
}
