//! Transport implementations for meshlink.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](meshlink_core::Transport) trait from `meshlink-core`:
//!
//! - [`SerialTransport`]: USB adapters and direct UART connections to a
//!   radio module
//! - [`TcpTransport`]: TCP connections, e.g. a serial-device server or a
//!   gateway exposing the module's UART over the network
//!
//! The transports are plain byte pipes. Framing, checksums, and escaping
//! are the protocol engine's concern; neither direction preserves frame
//! boundaries.
//!
//! # Example
//!
//! ```no_run
//! use meshlink_transport::SerialTransport;
//! use meshlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> meshlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9_600).await?;
//!
//! // Raw frame bytes straight to the module.
//! transport.send(&[0x7E, 0x00, 0x04, 0x08, 0x01, 0x56, 0x52, 0x4E]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod tcp;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
pub use tcp::TcpTransport;
