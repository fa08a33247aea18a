//! Frame dispatcher: the single point of truth for what happens to a
//! decoded frame.
//!
//! Every frame the link task decodes is offered to the dispatcher, which
//! routes it in two stages:
//!
//! 1. **Correlation.** If the frame carries a nonzero frame id and a
//!    pending request is registered under that id whose predicate accepts
//!    the frame, the request is fulfilled (exactly once) and routing stops.
//!    A frame consumed as a correlated response is never also fanned out,
//!    so a blocking caller and a passive listener cannot both observe it.
//! 2. **Fan-out.** Otherwise the frame is cloned to every listener
//!    registered for its category, in registration order. Listeners are
//!    bounded queues drained by their own tasks; a full queue loses that
//!    listener's copy (counted) rather than stalling dispatch or the
//!    frames behind it.
//!
//! Registration and removal are safe from any task, including from a
//! listener reacting to its own queue: fan-out iterates a snapshot taken
//! under the lock, never the live registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

use meshlink_core::{Error, Result};

use crate::frame::Frame;

/// Queue depth for each registered listener.
pub const LISTENER_CAPACITY: usize = 64;

/// Which listeners a frame is fanned out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerCategory {
    /// Received application payloads.
    Data,
    /// Received payloads with explicit addressing metadata.
    ExplicitData,
    /// I/O sample notifications.
    IoSample,
    /// Unsolicited modem status changes.
    ModemStatus,
    /// Network discovery announcements.
    Discovery,
}

/// Handle identifying a registered listener, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// A registered listener: its id plus the receiving end of its queue.
#[derive(Debug)]
pub struct FrameListener {
    /// Pass to [`Dispatcher::unregister_listener`] to stop delivery.
    pub id: ListenerId,
    /// Frames of the subscribed category arrive here in dispatch order.
    pub rx: mpsc::Receiver<Frame>,
}

/// Predicate deciding whether an inbound frame satisfies a pending request.
pub type FramePredicate = Box<dyn Fn(&Frame) -> bool + Send + Sync>;

struct Pending {
    predicate: FramePredicate,
    tx: oneshot::Sender<Frame>,
}

/// Central routing hub for one open connection.
///
/// All state is per-connection; nothing here is shared between devices.
pub struct Dispatcher {
    pending: Mutex<HashMap<u8, Pending>>,
    listeners: Mutex<HashMap<ListenerCategory, Vec<(ListenerId, mpsc::Sender<Frame>)>>>,
    next_listener_id: AtomicU64,
    unrecognized: AtomicU64,
    lost_deliveries: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            unrecognized: AtomicU64::new(0),
            lost_deliveries: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------
    // Pending requests
    // -----------------------------------------------------------------

    /// Register a pending request under `frame_id`.
    ///
    /// Fails if `frame_id` is zero (reserved for unsolicited frames) or if
    /// a request is already in flight under that id — at most one pending
    /// entry per id exists at any time.
    pub fn register_pending(
        &self,
        frame_id: u8,
        predicate: FramePredicate,
    ) -> Result<oneshot::Receiver<Frame>> {
        if frame_id == 0 {
            return Err(Error::Protocol(
                "frame id 0 is reserved for unsolicited frames".into(),
            ));
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&frame_id) {
            return Err(Error::IllegalState(format!(
                "frame id {frame_id} already has a request in flight"
            )));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(frame_id, Pending { predicate, tx });
        Ok(rx)
    }

    /// Remove a pending request (timeout or write failure on the caller's
    /// side). Returns `true` if an entry was removed; `false` means the
    /// request was already fulfilled or never existed.
    pub fn forget_pending(&self, frame_id: u8) -> bool {
        self.pending.lock().unwrap().remove(&frame_id).is_some()
    }

    /// Whether a request is currently in flight under `frame_id`.
    pub fn has_pending(&self, frame_id: u8) -> bool {
        self.pending.lock().unwrap().contains_key(&frame_id)
    }

    // -----------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------

    /// Register a listener for a frame category.
    ///
    /// Notification order among listeners of a category is registration
    /// order. The returned receiver is the listener's private queue.
    pub fn register_listener(&self, category: ListenerCategory) -> FrameListener {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap()
            .entry(category)
            .or_default()
            .push((id, tx));
        FrameListener { id, rx }
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    /// Route one decoded frame.
    ///
    /// Called from the link task for every frame, in decode (FIFO) order.
    pub fn dispatch(&self, frame: Frame) {
        // Stage 1: correlation by frame id.
        if let Some(id) = frame.frame_id() {
            if id != 0 {
                let mut pending = self.pending.lock().unwrap();
                let matched = pending
                    .get(&id)
                    .is_some_and(|entry| (entry.predicate)(&frame));
                if matched {
                    if let Some(entry) = pending.remove(&id) {
                        drop(pending);
                        // The waiter may have timed out between predicate
                        // check and delivery; the frame is then dropped,
                        // not rerouted.
                        if entry.tx.send(frame).is_err() {
                            tracing::trace!(
                                frame_id = id,
                                "response arrived after waiter gave up"
                            );
                        }
                    }
                    return;
                }
            }
        }

        // Stage 2: category fan-out.
        let category = match category_of(&frame) {
            Some(c) => c,
            None => {
                match &frame {
                    Frame::Raw { frame_type, .. } => {
                        self.unrecognized.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(frame_type, "ignoring unrecognized frame type");
                    }
                    other => {
                        // Solicited kinds with no waiting request (stale or
                        // unsolicited response).
                        tracing::trace!(
                            frame_type = other.frame_type(),
                            frame_id = other.frame_id(),
                            "dropping uncorrelated frame"
                        );
                    }
                }
                return;
            }
        };

        let snapshot: Vec<(ListenerId, mpsc::Sender<Frame>)> = {
            let listeners = self.listeners.lock().unwrap();
            match listeners.get(&category) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        let mut closed = Vec::new();
        for (id, tx) in &snapshot {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.lost_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?category, "listener queue full, dropping its copy");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            self.unregister_listener(id);
        }
    }

    /// Count of well-framed messages with a type this engine ignores.
    pub fn unrecognized_count(&self) -> u64 {
        self.unrecognized.load(Ordering::Relaxed)
    }

    /// Count of listener deliveries lost to full queues.
    pub fn lost_delivery_count(&self) -> u64 {
        self.lost_deliveries.load(Ordering::Relaxed)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// The listener category a frame fans out to, if any.
///
/// Solicited kinds (command responses, transmit statuses) have no listener
/// category: they are either consumed by correlation or dropped as stale.
pub fn category_of(frame: &Frame) -> Option<ListenerCategory> {
    match frame {
        Frame::Receive { .. } => Some(ListenerCategory::Data),
        Frame::ExplicitReceive { .. } => Some(ListenerCategory::ExplicitData),
        Frame::IoSample { .. } => Some(ListenerCategory::IoSample),
        Frame::ModemStatus { .. } => Some(ListenerCategory::ModemStatus),
        Frame::DiscoveryNotice { .. } => Some(ListenerCategory::Discovery),
        _ => None,
    }
}
