//! Error types for the sniper

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniper
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // WebSocket feed errors
    #[error("WebSocket connection failed: {0}")]
    WsConnection(String),

    #[error("Subscription not acknowledged: {0}")]
    SubscribeFailed(String),

    // Aggregator errors
    #[error("Aggregator rate limit exhausted after {attempts} attempts: {detail}")]
    RateLimitExhausted { attempts: u32, detail: String },

    #[error("Aggregator unavailable after {attempts} attempts: {detail}")]
    UpstreamUnavailable { attempts: u32, detail: String },

    #[error("Aggregator returned malformed response: {0}")]
    MalformedResponse(String),

    #[error("Aggregator HTTP {status}: {detail}")]
    AggregatorStatus { status: u16, detail: String },

    // Route quality errors (permanent for the attempted parameters)
    #[error("Route illiquid: price impact {impact_pct:.4} exceeds ceiling")]
    IlliquidRoute { impact_pct: f64 },

    #[error("Pool depth {estimated_usd:.2} USD below floor {floor_usd:.2} USD")]
    PoolTooShallow { estimated_usd: f64, floor_usd: f64 },

    #[error("No usable quote for {0}")]
    NoQuote(String),

    // Trading errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient) at a coarser grain
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_)
                | Error::RpcTimeout(_)
                | Error::WsConnection(_)
                | Error::RateLimitExhausted { .. }
                | Error::UpstreamUnavailable { .. }
                | Error::TransactionSend(_)
        )
    }

    /// Permanent for the attempted parameters; retrying the identical call is pointless
    pub fn is_permanent_request_fault(&self) -> bool {
        matches!(
            self,
            Error::MalformedResponse(_)
                | Error::IlliquidRoute { .. }
                | Error::PoolTooShallow { .. }
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Trim RPC/simulation errors so operational logs stay legible.
///
/// Keeps the first line only and collapses known verbose payloads
/// to a short label.
pub fn short_error(e: &dyn std::fmt::Display) -> String {
    let msg = e.to_string();
    if msg.is_empty() {
        return "unknown error".to_string();
    }
    if msg.contains("Transaction simulation failed") {
        return "Transaction simulation failed".to_string();
    }
    if let Some(idx) = msg.find("custom program error") {
        return msg[idx..]
            .lines()
            .next()
            .unwrap_or("custom program error")
            .to_string();
    }
    msg.lines().next().unwrap_or("unknown error").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_error_first_line_only() {
        let e = Error::Rpc("line one\nline two\nline three".to_string());
        assert_eq!(short_error(&e), "RPC error: line one");
    }

    #[test]
    fn test_short_error_collapses_simulation_noise() {
        let e = Error::TransactionSend(
            "Transaction simulation failed: Error processing Instruction 3: ...".to_string(),
        );
        assert_eq!(short_error(&e), "Transaction simulation failed");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamUnavailable {
            attempts: 5,
            detail: "502".into()
        }
        .is_retryable());
        assert!(!Error::MalformedResponse("bad json".into()).is_retryable());
        assert!(Error::MalformedResponse("bad json".into()).is_permanent_request_fault());
    }
}
