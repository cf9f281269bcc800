// src/error.rs
//! Typed errors for the boundaries where callers need to tell failures apart.
//! Plumbing code (providers, bot loop, `main`) uses `anyhow` with context instead.

use thiserror::Error;

/// Startup configuration problems. These are the only errors that stop the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required variable absent or blank.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// Variable present but not parseable.
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    /// Feed list file unreadable or in an unknown format.
    #[error("feed list error: {0}")]
    Feeds(String),
}

impl ConfigError {
    pub fn invalid(var: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Invalid {
            var,
            message: message.to_string(),
        }
    }
}

/// Watermark store persistence failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Delivery gateway failures. Any of these means "not confirmed".
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("no subscriber registered")]
    NoRecipient,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API rejected request ({status}): {description}")]
    Rejected { status: u16, description: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_names_the_variable() {
        let e = ConfigError::Missing("TELEGRAM_BOT_TOKEN");
        assert_eq!(
            e.to_string(),
            "missing required configuration: TELEGRAM_BOT_TOKEN"
        );
    }

    #[test]
    fn rejected_delivery_carries_status() {
        let e = DeliveryError::Rejected {
            status: 400,
            description: "Bad Request: chat not found".into(),
        };
        assert!(e.to_string().contains("400"));
        assert!(e.to_string().contains("chat not found"));
    }
}
