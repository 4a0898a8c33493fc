//! Seams between the engine and its collaborators.
//!
//! Every external system (clock, mail provider, chat provider, durable
//! queue) is reached through one of these traits, built once at startup
//! and injected as `Arc<dyn ...>`.

pub mod chat;
pub mod clock;
pub mod mailer;
pub mod queue;

pub use chat::ChatProvider;
pub use clock::{Clock, ManualClock, SystemClock};
pub use mailer::Mailer;
pub use queue::JobQueue;
