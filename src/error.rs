//! Error types for the delta feed engine.
//!
//! Clean error handling using `thiserror` for ergonomic error definitions.
//!
//! Two families matter operationally: bug-class conditions (overfill,
//! crossing-state violations) that abort the run, and codec/validation
//! failures surfaced to the caller. Benign exchange artifacts (cancel of an
//! unknown id, trade against a hidden leg) are absorbed inside the handlers
//! and never reach this type.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A trade reported more quantity than the resting order had left
    #[error("trade overfill on order {order_id}: fill {fill} exceeds remaining {remaining}")]
    Overfill {
        order_id: u64,
        fill: i32,
        remaining: i32,
    },

    /// A new/modify arrived while a crossing was still being reconciled
    #[error("'{op}' event for order {order_id} while a crossing is active")]
    CrossingActive { op: char, order_id: u64 },

    /// Pre-peek crossing classification disagreed with actual consumption
    #[error("crossing prediction mismatch for order {order_id}: predicted {predicted}, consumed {consumed}")]
    CrossingPrediction {
        order_id: u64,
        predicted: bool,
        consumed: i64,
    },

    /// Input or chunk buffer too short for the next fixed-size record
    #[error("truncated record: need {need} bytes, have {have}")]
    TruncatedRecord { need: usize, have: usize },

    /// Unknown event code byte
    #[error("invalid tick type byte: {0:#04x}")]
    InvalidTickType(u8),

    /// Unknown delta type byte in a chunk payload
    #[error("invalid delta type byte: {0:#04x}")]
    InvalidDeltaType(u8),

    /// Price rejected at the adapter boundary
    #[error("invalid price: {0}")]
    InvalidPrice(i64),

    /// Reconstructed snapshot differs from the reference stream.
    ///
    /// `code` is the typed mismatch location: negative values are bid level
    /// indices (`-(idx + 1)`), positive values up to 20 are ask level indices
    /// (`idx + 1`), and values of 100 and above name a metadata field.
    #[error("snapshot mismatch at record {record_idx}: code {code}")]
    SnapshotMismatch { record_idx: u32, code: i32 },

    /// I/O failure on the input or reference file
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}
