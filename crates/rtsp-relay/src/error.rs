use std::io;

use thiserror::Error;

use crate::frame::FramingError;

/// Errors that end a connection or prevent a listener from starting.
///
/// Every variant is contained at the connection boundary except
/// [`RelayError::Bind`], which is a startup failure.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {addr} after {timeout_ms} ms")]
    ConnectTimeout { addr: String, timeout_ms: u128 },

    #[error("failed to bind channel {channel} on {addr}: {source}")]
    Bind {
        channel: String,
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl RelayError {
    /// Short machine-friendly label used in events.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Framing(_) => "framing",
            RelayError::Read(_) => "read",
            RelayError::Write(_) => "write",
            RelayError::Connect { .. } => "connect",
            RelayError::ConnectTimeout { .. } => "connect_timeout",
            RelayError::Bind { .. } => "bind",
        }
    }
}
