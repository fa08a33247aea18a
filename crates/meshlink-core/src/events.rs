//! Asynchronous notification types.
//!
//! Events are emitted by the protocol engine through [`tokio::sync::broadcast`]
//! channels. Delivery is best-effort over a bounded channel: a slow
//! subscriber may miss events under load, but never stalls the engine.

use crate::address::RemoteNode;

/// A connection-level event emitted by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The connection was opened and its operating mode classified.
    Connected,
    /// The background reader hit a transport error and stopped.
    ///
    /// The connection is unusable after this; reopening is the caller's
    /// decision (nothing is retried inside the engine).
    ConnectionLost,
}

/// Why a discovery run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The module signalled end-of-discovery.
    Completed,
    /// The caller stopped the scan early.
    Stopped,
    /// The network-wide timeout elapsed.
    TimedOut,
}

/// An event emitted during a network discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A device not previously seen in this run announced itself.
    DeviceDiscovered(RemoteNode),
    /// The run ended. Carries the full deduplicated collection.
    Finished {
        reason: FinishReason,
        devices: Vec<RemoteNode>,
    },
}
