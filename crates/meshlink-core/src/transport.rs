//! Transport trait for module communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a radio
//! module. Implementations exist for serial ports and TCP sockets (in the
//! `meshlink-transport` crate), and for scripted mock transports (in the
//! `meshlink-test-harness` crate).
//!
//! The protocol engine operates on a `Transport` rather than directly on a
//! serial port, enabling both real hardware control and deterministic unit
//! testing. A transport is a plain byte pipe: it is not required to
//! preserve frame boundaries in either direction.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a radio module.
///
/// Implementations handle buffering and error mapping at the physical
/// layer. Protocol-level concerns (framing, checksums, escaping) are
/// handled by the engine that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the module.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying transport (serial TX buffer, TCP socket).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the module into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotOpen`](crate::error::Error::NotOpen).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
