//! meshlink-core: Core traits, types, and error definitions for meshlink.
//!
//! This crate defines the transport-agnostic abstractions the protocol
//! engine and the transports build on. Applications depend on these types
//! without pulling in a specific transport implementation.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to a radio module
//! - [`Addr64`] / [`Addr16`] / [`RemoteNode`] -- device addressing
//! - [`LinkEvent`] / [`DiscoveryEvent`] -- asynchronous notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod address;
pub mod error;
pub mod events;
pub mod status;
pub mod transport;

// Re-export key types at crate root for ergonomic `use meshlink_core::*`.
pub use address::{Addr16, Addr64, DeviceType, RemoteNode};
pub use error::{Error, Result};
pub use events::{DiscoveryEvent, FinishReason, LinkEvent};
pub use status::{AtStatus, DeliveryStatus, ModemStatusCode, OperatingMode};
pub use transport::Transport;
