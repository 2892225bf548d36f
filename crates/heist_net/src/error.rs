//! Network-layer error types.

use crate::rpc::RpcId;

/// Errors that can occur while encoding, decoding or dispatching datagrams.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The datagram is shorter than its checksum or the checksum does not
    /// match the payload.
    #[error("datagram failed integrity check")]
    IntegrityFailure,

    /// No procedure is registered under the identifier.
    #[error("unknown procedure {0}")]
    UnknownProcedure(RpcId),

    /// The argument bytes do not match the registered layout width.
    #[error("procedure {id} expects {expected} argument bytes, got {actual}")]
    LayoutMismatch {
        /// The procedure being decoded.
        id: RpcId,
        /// Width of the registered layout.
        expected: usize,
        /// Bytes left after the header.
        actual: usize,
    },

    /// A layout format string could not be parsed.
    #[error("invalid layout format '{format}': {reason}")]
    InvalidFormat {
        /// The offending format string.
        format: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A procedure with this identifier is already registered.
    #[error("procedure {0} is already registered")]
    DuplicateProcedure(RpcId),

    /// Argument values do not fit the layout they are encoded with.
    #[error("value mismatch: {0}")]
    ValueMismatch(String),

    /// The encoded datagram would exceed the configured maximum size.
    #[error("datagram of {size} bytes exceeds the {limit} byte limit")]
    Oversized {
        /// Size of the framed datagram.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The procedure handler returned an error.
    #[error("handler for procedure {id} failed: {error:#}")]
    Handler {
        /// The procedure whose handler failed.
        id: RpcId,
        /// The handler's error.
        error: anyhow::Error,
    },

    /// Socket I/O error.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
