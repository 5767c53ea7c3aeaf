//! The error taxonomy for the session runtime.
//!
//! Every fallible operation in this crate returns one of the kinds below
//! rather than a boxed, opaque error: the session state machine needs to
//! tell the difference between "reply 404 and keep going" and "the socket
//! is gone", and a flat `Box<dyn Error>` can't carry that distinction.

use thiserror::Error;

/// Error kinds produced by the session runtime.
///
/// These correspond 1:1 to the kinds enumerated in the design: each one
/// maps to a wire status code where a reply is still possible, or to a
/// log severity where it isn't.
#[derive(Debug, Error)]
pub enum RivError {
    /// Framing failure, truncated message, magic/byte-order mismatch, or
    /// an unknown reserved id repeated past the error threshold.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The requested provider or data binding does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The request asks for a (sub)type this build does not implement.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// The query string is missing a required parameter.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An internal dynamic-type mismatch (encoder/provider bookkeeping).
    #[error("internal error: {0}")]
    InternalError(String),

    /// The peer closed the connection. Benign during idle loops, fatal
    /// when it happens mid-read.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// Any other I/O failure from the socket layer.
    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    /// A connect/disconnect hook vetoed the operation.
    #[error("connection aborted by hook")]
    AbortedByHook,

    /// API misuse: a null/unknown handle was passed where a live node
    /// was required.
    #[error("null argument")]
    NullArgument,
}

impl RivError {
    /// The wire status code a session should reply with, if a reply is
    /// still possible at the point the error surfaced.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RivError::BadRequest(_) => Some(400),
            RivError::ResourceNotFound(_) => Some(404),
            RivError::UnsupportedMedia(_) => Some(415),
            RivError::InternalError(_) => Some(500),
            RivError::ProtocolViolation(_)
            | RivError::PeerDisconnected
            | RivError::SocketError(_)
            | RivError::AbortedByHook
            | RivError::NullArgument => None,
        }
    }

    /// True for errors that are an expected part of a peer going away,
    /// as opposed to a genuine failure worth logging at ERROR.
    pub fn is_benign_close(&self) -> bool {
        matches!(self, RivError::PeerDisconnected)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RivError>;
