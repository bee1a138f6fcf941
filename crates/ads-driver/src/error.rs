//! Error types for the driver.

use std::io;
use std::time::Duration;

use ads_transport::{CodecError, CommandId, InvokeId, PacketError, ReturnCode};

/// Convenience alias used throughout the driver.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by [`Connection`](crate::Connection) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request could not be written; nothing is pending for it.
    #[error("failed to send request: {0}")]
    Send(#[source] CodecError),

    /// No matching response arrived before the deadline.
    #[error("request {invoke_id} timed out after {timeout:?}")]
    Timeout {
        invoke_id: InvokeId,
        timeout: Duration,
    },

    /// The response arrived but could not be parsed.
    #[error("malformed response: {0}")]
    Decode(#[source] PacketError),

    /// The receive loop stopped before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// Every invoke id is taken by an outstanding request.
    #[error("too many outstanding requests, all 255 invoke ids are in use")]
    TooManyPendingRequests,

    /// The call was malformed; no traffic was issued.
    #[error("usage error: {0}")]
    Usage(String),

    /// The device answered with a non-OK return code.
    #[error("device returned {0}")]
    Protocol(ReturnCode),

    #[error("unexpected response payload to {0:?} request")]
    UnexpectedResponse(CommandId),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// A symbolic address could not be mapped to device memory.
///
/// These describe genuine addressing faults or a stale table; they are never
/// cached, so a retry after the PLC program changed can succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown symbol {0:?}")]
    UnknownSymbol(String),

    #[error("unknown data type {data_type:?} while resolving {address:?}")]
    UnknownDataType { address: String, data_type: String },

    #[error("data type {data_type:?} has no child {child:?} (resolving {address:?})")]
    UnknownChild {
        address: String,
        data_type: String,
        child: String,
    },

    #[error("data type nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("{address:?} is not an array")]
    NotAnArray { address: String },

    #[error("array range {requested} of {address:?} outside {declared}")]
    IndexOutOfRange {
        address: String,
        requested: String,
        declared: String,
    },

    #[error("{address:?} spans more than 4 GiB")]
    TooLarge { address: String },

    #[error("device refused a handle for {address:?}: {code}")]
    HandleRejected { address: String, code: ReturnCode },
}

/// Textual address errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("invalid address format: {0:?}")]
    InvalidAddress(String),

    #[error("unknown data type {data_type:?} in address {address:?}")]
    UnknownDataType { address: String, data_type: String },

    /// The addressed memory does not fit a 32 bit length.
    #[error("{0:?} spans more than 4 GiB")]
    TooLarge(String),
}

/// Values that cannot be converted to or from device memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("need {needed} bytes, only {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("expected a {expected} value, got {found}")]
    TypeMismatch {
        expected: String,
        found: &'static str,
    },

    #[error("{value} does not fit in {data_type}")]
    OutOfRange {
        data_type: &'static str,
        value: String,
    },

    #[error("string of {found} characters exceeds maximum of {max}")]
    StringTooLong { max: usize, found: usize },

    #[error("expected {expected} elements, got {found}")]
    WrongElementCount { expected: usize, found: usize },

    #[error("memory layout spans more than 4 GiB")]
    TooLarge,

    #[error("character cannot be represented")]
    InvalidCharacter,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// The symbol or data-type upload could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table truncated reading {0}")]
    Truncated(&'static str),

    #[error("table entry with invalid length {0}")]
    InvalidEntryLength(u32),

    #[error("data type entries nested deeper than {0} levels")]
    TooDeep(usize),
}
