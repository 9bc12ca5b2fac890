//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete message (need more data)
    #[error("incomplete message")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0:#04x}")]
    Version(u8),

    /// Unknown message type
    #[error("unknown type {0}")]
    Type(u8),

    /// Declared length outside the permitted range
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Declared length disagrees with the bytes supplied
    #[error("length mismatch: header says {declared}, got {actual}")]
    Length {
        /// Length carried in the header
        declared: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Field value not representable on the wire
    #[error("invalid {field}: {value}")]
    Value {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Malformed message body
    #[error("malformed {0} body")]
    Malformed(&'static str),
}
