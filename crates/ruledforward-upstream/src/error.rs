//! Error types for upstream exchanges.

use thiserror::Error;

/// Errors from dialing or exchanging with an upstream.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// A cached stream connection turned out to be closed by the peer.
    /// Callers retry immediately on a fresh connection.
    #[error("cached connection closed")]
    CachedClosed,

    #[error("request timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("proto error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    #[error("invalid upstream address: {0}")]
    InvalidAddress(String),

    #[error("tls error: {0}")]
    Tls(String),
}
