//! Error types shared by every StoreWatch crate.

use thiserror::Error;

/// Everything that can go wrong inside the engine.
#[derive(Debug, Error)]
pub enum StoreWatchError {
    /// Referenced cart, alert or product does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed tracking payload or message.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Email/chat provider rejected the message, answered non-2xx or timed out.
    #[error("provider failure: {0}")]
    Provider(String),

    /// Missing credentials, endpoints or other required configuration.
    #[error("configuration missing: {0}")]
    Config(String),

    /// More than one active entity observed for a single business key,
    /// or the same entity processed twice at once.
    #[error("concurrency anomaly: {0}")]
    ConcurrencyAnomaly(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreWatchError {
    /// Short machine-readable kind, used in logs and CLI summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Provider(_) => "provider",
            Self::Config(_) => "config",
            Self::ConcurrencyAnomaly(_) => "concurrency",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for StoreWatchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreWatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_display() {
        let err = StoreWatchError::NotFound("cart abc".into());
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "not found: cart abc");

        let err = StoreWatchError::Provider("timed out after 10s".into());
        assert_eq!(err.kind(), "provider");
    }

    #[test]
    fn test_from_serde_json() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: StoreWatchError = bad.unwrap_err().into();
        assert_eq!(err.kind(), "serialization");
    }
}
