//! # meshlink -- Host-Side Driver for Mesh Radio Modules
//!
//! `meshlink` is an asynchronous Rust library for driving mesh radio
//! modules (802.15.4-class RF modems) from a host computer over a serial
//! port or TCP socket. It speaks the modules' framed, checksummed binary
//! API protocol (escaped or not) as well as the legacy unframed AT text
//! mode, and is built for gateway daemons, sensor collectors, and fleet
//! provisioning tools where many frames are in flight at once.
//!
//! ## Quick Start
//!
//! Add `meshlink` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! meshlink = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Connect to a module and read its node identifier:
//!
//! ```no_run
//! use meshlink::{CommandCapable, DeviceBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let radio = DeviceBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .baud_rate(9_600)
//!         .open()
//!         .await?;
//!
//!     let ni = radio.execute_command("NI", &[]).await?;
//!     println!("node identifier: {}", String::from_utf8_lossy(&ni));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                   | Purpose                                       |
//! |-------------------------|-----------------------------------------------|
//! | `meshlink-core`         | Error type, `Transport` trait, addresses, events |
//! | `meshlink-api`          | Frame codec, link task, dispatcher, commands, discovery |
//! | `meshlink-transport`    | Serial and TCP transport implementations      |
//! | `meshlink-test-harness` | Scriptable mock transport for tests           |
//! | **`meshlink`**          | This facade crate -- re-exports everything    |
//!
//! ## How a connection works
//!
//! Opening a connection probes the module to classify its operating mode
//! (framed API, escaped API, or legacy AT text). In API modes a single
//! background task owns the transport: it serializes outbound frames and
//! continuously decodes inbound bytes, routing each frame either to the
//! command waiting on its frame id or to the listeners of its category.
//! Commands are plain `async` calls with deterministic timeouts; received
//! data, I/O samples, modem status, and discovery announcements arrive on
//! per-listener queues or broadcast channels.
//!
//! ## Receiving data
//!
//! ```no_run
//! use meshlink::{DeviceBuilder, Frame, ListenerCategory};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let radio = DeviceBuilder::new().serial_port("/dev/ttyUSB0").open().await?;
//!
//! let mut listener = radio.listen(ListenerCategory::Data)?;
//! while let Some(frame) = listener.rx.recv().await {
//!     if let Frame::Receive { src64, payload, .. } = frame {
//!         println!("{src64}: {payload:02X?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Discovering the network
//!
//! ```no_run
//! use meshlink::{DeviceBuilder, DiscoverCapable, DiscoveryConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let radio = DeviceBuilder::new().serial_port("/dev/ttyUSB0").open().await?;
//!
//! for node in radio.discover_network(DiscoveryConfig::default()).await? {
//!     println!("{} at {} ({:?})", node.node_id, node.addr64, node.device_type);
//! }
//! # Ok(())
//! # }
//! ```

pub use meshlink_core::*;

pub use meshlink_api::{
    CommandCapable, DataTransmittable, DeviceBuilder, DiscoverCapable, Dispatcher,
    DiscoveryConfig, Frame, FrameListener, ListenerCategory, ListenerId, LocalRadio, RadioLink,
    RemoteRadio,
};

pub use meshlink_transport::{SerialConfig, SerialTransport, TcpTransport};

/// Frame-level building blocks: wire codec, typed frames, dispatch, and
/// the legacy AT text codec.
pub mod api {
    pub use meshlink_api::*;
}
