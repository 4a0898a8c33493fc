//! # StoreWatch Core
//!
//! Shared building blocks for the reconciliation engine: the error type,
//! configuration, domain records and the provider traits every channel
//! and store implements.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::StoreWatchConfig;
pub use error::{Result, StoreWatchError};
