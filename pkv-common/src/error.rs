//! Errors raised while decoding RESP2 input.

use thiserror::Error;

/// Result alias for decoder operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Unrecoverable decode failures.
///
/// Once a decoder reports one of these the byte stream is out of sync and the
/// connection carrying it has to be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A byte that is not valid in the decoder's current state.
    #[error("unexpected byte 0x{byte:02x} while reading {state}")]
    UnexpectedByte { state: &'static str, byte: u8 },
    /// A length or integer did not fit in an `i64`.
    #[error("integer overflow")]
    Overflow,
    /// Negative length other than the `-1` null marker.
    #[error("invalid length {0}")]
    InvalidLength(i64),
    /// Bulk string longer than the decoder accepts.
    #[error("bulk string of {0} bytes exceeds limit")]
    TooLarge(i64),
    /// Simple string or error text that is not UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}
