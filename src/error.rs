use thiserror::Error;

use crate::layers::dense::Slot;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, NnError>;

#[derive(Error, Debug)]
pub enum NnError {
    /// Two operands whose shapes must agree do not.
    #[error(
        "{op}: dimension mismatch, left is [{left_rows} x {left_cols}] and right is [{right_rows} x {right_cols}]"
    )]
    DimensionMismatch {
        op: &'static str,
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },

    /// A destination buffer does not hold the required number of elements.
    #[error("{op}: size mismatch, expected {expected} elements but destination holds {got}")]
    SizeMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{op}: index ({row}, {col}) is out of range for a [{rows} x {cols}] matrix")]
    IndexOutOfRange {
        op: &'static str,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("{op}: matrix has no elements")]
    EmptyMatrix { op: &'static str },

    /// A layer slot was read before anything was written to it.
    #[error("layer slot {slot} has not been allocated")]
    MissingSlot { slot: Slot },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("model format error: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
