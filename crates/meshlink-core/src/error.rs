//! Error types for meshlink.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! command-layer errors are all captured here.

use crate::status::{AtStatus, DeliveryStatus, OperatingMode};

/// The error type for all meshlink operations.
///
/// Variants cover the full range of failure modes encountered when driving
/// a radio module: physical transport failures, timeouts, command
/// rejections, and misuse of the connection lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, TCP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error that is not recoverable by resynchronization
    /// (e.g. a response frame whose payload cannot be interpreted).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response from the module.
    ///
    /// This typically indicates the module is unpowered, the baud rate is
    /// wrong, or the addressed remote node is unreachable.
    #[error("timeout waiting for response")]
    Timeout,

    /// The connection has not been opened, or has already been closed.
    #[error("connection not open")]
    NotOpen,

    /// The connection to the module was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The operation requires framed API mode but the module is in a
    /// different operating mode.
    #[error("invalid operating mode: {0}")]
    InvalidOperatingMode(OperatingMode),

    /// The module answered a command with a non-OK status.
    #[error("command rejected by module: {0}")]
    CommandRejected(AtStatus),

    /// A solicited transmission was not delivered.
    #[error("transmit failed: {0}")]
    TransmitFailed(DeliveryStatus),

    /// An operation was attempted in a state that does not allow it
    /// (e.g. starting a discovery scan while one is already running).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
