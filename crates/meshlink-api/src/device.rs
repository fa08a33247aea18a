//! Device-level values and capability traits.
//!
//! [`LocalRadio`] is the module on the near end of the transport;
//! [`RemoteRadio`] is a peer discovered on the network. Both compose the
//! protocol engine by holding a reference to the connection's
//! [`RadioLink`] — capabilities are expressed as traits implemented over
//! that shared engine, not as a device class hierarchy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use meshlink_core::{
    Addr16, Addr64, DiscoveryEvent, LinkEvent, OperatingMode, RemoteNode, Result,
};

use crate::command::RadioLink;
use crate::discovery::{self, DiscoveryConfig};
use crate::dispatch::{FrameListener, ListenerCategory, ListenerId};
use crate::frame::Frame;

/// Devices that accept configuration commands.
#[async_trait]
pub trait CommandCapable: Send + Sync {
    /// Execute a two-letter configuration command; returns the value bytes.
    async fn execute_command(&self, command: &str, parameter: &[u8]) -> Result<Vec<u8>>;

    /// Execute a configuration command with an explicit deadline.
    async fn execute_command_timeout(
        &self,
        command: &str,
        parameter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

/// Destinations that accept application payloads.
#[async_trait]
pub trait DataTransmittable: Send + Sync {
    /// Send a payload and wait for the delivery report.
    async fn send_data(&self, payload: &[u8]) -> Result<()>;

    /// Send a payload without soliciting a delivery report.
    async fn send_data_async(&self, payload: &[u8]) -> Result<()>;
}

/// Devices that can scan the network for peers.
#[async_trait]
pub trait DiscoverCapable: Send + Sync {
    /// Start a scan; results arrive as [`DiscoveryEvent`]s.
    async fn start_discovery(&self, config: DiscoveryConfig) -> Result<()>;

    /// Stop a running scan early.
    fn stop_discovery(&self) -> Result<()>;

    /// Run a full scan and return the deduplicated collection.
    async fn discover_network(&self, config: DiscoveryConfig) -> Result<Vec<RemoteNode>>;

    /// Look up one device by node identifier.
    async fn discover_device(
        &self,
        node_id: &str,
        config: DiscoveryConfig,
    ) -> Result<Option<RemoteNode>>;
}

/// The radio module on the near end of the transport.
///
/// Constructed via [`DeviceBuilder`](crate::builder::DeviceBuilder).
pub struct LocalRadio {
    link: Arc<RadioLink>,
}

impl LocalRadio {
    pub(crate) fn new(link: RadioLink) -> Self {
        LocalRadio {
            link: Arc::new(link),
        }
    }

    /// The underlying protocol engine, for frame-level access.
    pub fn link(&self) -> &Arc<RadioLink> {
        &self.link
    }

    /// The operating mode this connection was classified as.
    pub fn operating_mode(&self) -> OperatingMode {
        self.link.operating_mode()
    }

    /// `true` while the connection is open and the link is alive.
    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// Subscribe to connection-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.subscribe()
    }

    /// Subscribe to discovery events.
    pub fn subscribe_discovery(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.link.subscribe_discovery()
    }

    /// Register a listener for a frame category.
    pub fn listen(&self, category: ListenerCategory) -> Result<FrameListener> {
        self.link.listen(category)
    }

    /// Remove a previously registered listener.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.link.unlisten(id)
    }

    /// Encode and write a frame without waiting for anything in return.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.link.send_frame(frame).await
    }

    /// Write a frame and block until an inbound frame satisfies the
    /// predicate or the deadline elapses.
    pub async fn send_frame_and_wait<P>(
        &self,
        frame: Frame,
        predicate: P,
        timeout: Duration,
    ) -> Result<Frame>
    where
        P: Fn(&Frame) -> bool + Send + Sync + 'static,
    {
        self.link.send_frame_and_wait(frame, predicate, timeout).await
    }

    /// Send an application payload to a 64-bit address and wait for the
    /// delivery report.
    pub async fn send_data(&self, dest: Addr64, payload: &[u8]) -> Result<()> {
        self.link.send_data(dest, Addr16::UNKNOWN, payload).await
    }

    /// Broadcast an application payload to every node in range.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        self.link.broadcast(payload).await
    }

    /// Wrap a discovered identity in a [`RemoteRadio`] bound to this
    /// connection.
    pub fn remote(&self, node: RemoteNode) -> RemoteRadio {
        RemoteRadio {
            link: Arc::clone(&self.link),
            node,
        }
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<()> {
        self.link.close().await
    }
}

#[async_trait]
impl CommandCapable for LocalRadio {
    async fn execute_command(&self, command: &str, parameter: &[u8]) -> Result<Vec<u8>> {
        self.link.execute_command(command, parameter).await
    }

    async fn execute_command_timeout(
        &self,
        command: &str,
        parameter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.link
            .execute_command_timeout(command, parameter, timeout)
            .await
    }
}

#[async_trait]
impl DiscoverCapable for LocalRadio {
    async fn start_discovery(&self, config: DiscoveryConfig) -> Result<()> {
        discovery::start(Arc::clone(&self.link), config).await
    }

    fn stop_discovery(&self) -> Result<()> {
        discovery::stop(&self.link)
    }

    async fn discover_network(&self, config: DiscoveryConfig) -> Result<Vec<RemoteNode>> {
        discovery::discover_network(Arc::clone(&self.link), config).await
    }

    async fn discover_device(
        &self,
        node_id: &str,
        config: DiscoveryConfig,
    ) -> Result<Option<RemoteNode>> {
        discovery::discover_device(Arc::clone(&self.link), node_id, config).await
    }
}

/// A peer device on the radio network, addressed through the local module.
#[derive(Clone)]
pub struct RemoteRadio {
    link: Arc<RadioLink>,
    node: RemoteNode,
}

impl RemoteRadio {
    /// The identity record this device was discovered with.
    pub fn node(&self) -> &RemoteNode {
        &self.node
    }

    /// The device's 64-bit address.
    pub fn addr64(&self) -> Addr64 {
        self.node.addr64
    }

    /// The device's node identifier.
    pub fn node_id(&self) -> &str {
        &self.node.node_id
    }
}

#[async_trait]
impl DataTransmittable for RemoteRadio {
    async fn send_data(&self, payload: &[u8]) -> Result<()> {
        self.link
            .send_data(self.node.addr64, self.node.addr16, payload)
            .await
    }

    async fn send_data_async(&self, payload: &[u8]) -> Result<()> {
        self.link
            .send_data_async(self.node.addr64, self.node.addr16, payload)
            .await
    }
}
