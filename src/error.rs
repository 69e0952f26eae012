//! Error types for the HTLC relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No resolver configured for chain {chain_id}")]
    UnsupportedChain { chain_id: u64 },

    #[error("Order {order_hash} not found")]
    OrderNotFound { order_hash: String },

    #[error("RPC error on {chain}: {message}")]
    Rpc { chain: String, message: String },

    #[error("Chain submission failed on {chain}: {message}")]
    ChainSubmission { chain: String, message: String },

    #[error("Protocol violation for order {order_hash}: {message}")]
    ProtocolViolation { order_hash: String, message: String },

    #[error("Failed to build swap order: {0}")]
    BuildFailed(String),

    #[error("Failed to execute swap order {order_hash}")]
    ExecutionFailed { order_hash: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayerError::Timeout { .. } | RelayerError::Rpc { .. })
    }

    /// Check if the error was caused by the request rather than the relayer
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayerError::Validation(_)
                | RelayerError::UnsupportedChain { .. }
                | RelayerError::OrderNotFound { .. }
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
