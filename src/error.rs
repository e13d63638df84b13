use std::io;
use thiserror::Error;

use crate::notifications::codec::EncodingError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway misconfigured: {0}")]
    Configuration(String),

    #[error("Failed to connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Transport error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode notification: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Failed to decode feedback record: {0}")]
    Decoding(String),
}

impl GatewayError {
    /// Whether a send should reconnect and try the batch again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Connection { .. } | GatewayError::Io(_))
    }

    pub(crate) fn connection(endpoint: impl ToString, reason: impl ToString) -> Self {
        GatewayError::Connection {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}
