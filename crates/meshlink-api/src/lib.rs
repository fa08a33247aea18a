//! meshlink-api: the framed API protocol engine.
//!
//! This crate turns a byte-level [`Transport`](meshlink_core::Transport)
//! into a typed, concurrent radio-module driver:
//!
//! - [`wire`] -- frame assembly, checksums, byte escaping, and a streaming
//!   decoder that resynchronizes across corrupted input
//! - [`frame`] -- the typed [`Frame`](frame::Frame) model
//! - [`dispatch`] -- routing of decoded frames to pending commands and
//!   category listeners
//! - [`reader`] -- the background link task that owns the transport
//! - [`command`] -- the blocking command/response engine ([`RadioLink`])
//! - [`at`] -- the legacy unframed AT text codec
//! - [`mode`] -- operating-mode probing and classification
//! - [`discovery`] -- the network discovery state machine
//! - [`device`] -- capability traits, [`LocalRadio`] and [`RemoteRadio`]
//! - [`builder`] -- fluent construction and connection opening

pub mod at;
pub mod builder;
pub mod command;
pub mod device;
pub mod discovery;
pub mod dispatch;
pub mod frame;
pub mod mode;
pub mod reader;
pub mod wire;

pub use builder::DeviceBuilder;
pub use command::RadioLink;
pub use device::{CommandCapable, DataTransmittable, DiscoverCapable, LocalRadio, RemoteRadio};
pub use discovery::DiscoveryConfig;
pub use dispatch::{Dispatcher, FrameListener, ListenerCategory, ListenerId};
pub use frame::Frame;
