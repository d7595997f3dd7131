//! Error types for frame decoding and histogram comparison.

use thiserror::Error;

/// Errors raised while decoding a frame.
///
/// Every variant except `UnknownHistogramId` aborts the frame being decoded.
/// The session stays usable and the store keeps its previous state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// A read would cross the end of the buffer.
    #[error("buffer underrun: needed {needed} bytes, {remaining} remaining")]
    Underrun { needed: usize, remaining: usize },

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid UTF-8 in string field: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A JSON field could not be parsed.
    #[error("JSON parse error: {message}")]
    JsonParse { message: String },

    /// The frame carries a protocol version this crate does not understand.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The envelope carries an unknown frame type code.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u32),

    /// A data frame referenced a histogram that is not in the live map.
    #[error("unknown histogram id {0:?}")]
    UnknownHistogramId(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::JsonParse {
            message: err.to_string(),
        }
    }
}

/// Reasons a pair of histograms cannot be compared.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompareError {
    #[error("bin count mismatch: theory has {theory} bins, data has {data}")]
    BinCountMismatch { theory: usize, data: usize },

    /// Both theory and data are zero in the same bin.
    #[error("theory and data are both zero in bin {index}")]
    BlankBin { index: usize },

    /// No bin contributed to the estimate.
    #[error("no bins contributed to the comparison")]
    NoPoints,
}

/// Result type alias using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;
