//! # bloom-proto
//!
//! Versioned, self-describing binary protocol for cross-process
//! communication between the engine and the worker executable.
//!
//! Every message is a typed envelope: a length-prefixed text header
//! (`"lumenbloom Binary Data v1; Type: ConvNaiveRequest;"`) followed by the
//! message body as a fixed sequence of scalars, strings, and flat f32
//! vectors. The header is the sole compatibility check - a reader rejects
//! anything whose header does not exactly match the kind and version it
//! expects.
//!
//! Reading fails closed: a short read, I/O fault, or header mismatch
//! aborts decoding with a [`ProtoError`]; partially-read fields are
//! discarded, never returned.
//!
//! Scalars are fixed-width native-endian. Strings are u32-length-prefixed
//! UTF-8. Vectors are u32-count-prefixed flat arrays of f32. There is no
//! alignment padding.

#![warn(missing_docs)]

mod message;
mod stream;

pub use message::{
    BinaryMessage, ConvNaiveRequest, ConvNaiveResponse, ConvNaiveStat, DispersionRequest,
    DispersionResponse, OpKind,
};
pub use stream::{
    read_f32, read_f32_vec, read_string, read_u32, write_f32, write_f32_vec, write_string,
    write_u32, MAX_STRING_LEN, MAX_VEC_LEN,
};

use thiserror::Error;

/// Protocol version embedded in every message header.
pub const PROTOCOL_VERSION: &str = "1";

/// Builds the exact header string for a message kind.
pub fn header_for(kind: &str) -> String {
    format!("lumenbloom Binary Data v{PROTOCOL_VERSION}; Type: {kind};")
}

/// Errors raised while encoding or decoding a binary message.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Underlying stream fault (EOF mid-field, I/O error).
    #[error("stream fault: {0}")]
    Io(#[from] std::io::Error),

    /// A string field was not valid UTF-8.
    #[error("invalid string field: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// Header did not match the expected kind/version.
    #[error("header mismatch: expected {expected:?}, read {found:?}")]
    HeaderMismatch {
        /// The header this reader requires.
        expected: String,
        /// The header actually present in the stream.
        found: String,
    },

    /// A length prefix exceeded the per-field limit.
    #[error("field length {len} exceeds the limit of {max}")]
    FieldTooLarge {
        /// Declared length.
        len: u32,
        /// Largest length this reader accepts.
        max: u32,
    },

    /// Operation tag did not name a known operation.
    #[error("unknown operation tag: {0}")]
    UnknownOp(u32),
}

impl From<ProtoError> for bloom_core::Error {
    fn from(err: ProtoError) -> Self {
        bloom_core::Error::Stream(err.to_string())
    }
}
