//! Error taxonomy (spec §7)
//!
//! Pure/deterministic errors are returned as values; `EngineError` covers
//! everything that is non-retryable at the layer that raises it. Admission
//! rejections are a separate `Reject` sum type (see `execution`) and are
//! never threaded through this enum — they are ordinary values, never
//! thrown.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("bar store schema mismatch: on-disk version {found}, supported {supported}")]
    SchemaMismatch { found: u32, supported: u32 },

    #[error("data integrity violation for {symbol} {timeframe}: {reason}")]
    DataIntegrity { symbol: String, timeframe: String, reason: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("session not connected")]
    NotConnected,

    #[error("connection lost after exhausting reconnect attempts")]
    ConnectionLost,

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by broker")]
    RateLimited,

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("invalid bar for {symbol} {timeframe}: {reason}")]
    InvalidBar { symbol: String, timeframe: String, reason: String },

    #[error("out-of-order bar for {symbol} {timeframe}: got {got}, expected > {last}")]
    OutOfOrder { symbol: String, timeframe: String, got: i64, last: i64 },

    #[error("broker rejected order: {reason}")]
    OrderRejected { reason: String },

    #[error("placement failed: {reason}")]
    PlacementFailed { reason: String },

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("connection refused by broker")]
    ConnectionRefused,
}

pub type EngineResult<T> = Result<T, EngineError>;
