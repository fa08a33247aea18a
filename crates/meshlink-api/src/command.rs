//! The command/response engine.
//!
//! [`RadioLink`] is the per-connection protocol engine: it owns the
//! dispatcher, the background link task (API modes) or the serialized
//! transport (legacy mode), the frame-id pool, and the event channels.
//! Device-level values ([`crate::device::LocalRadio`]) compose a
//! `RadioLink` by holding a reference to it.
//!
//! Commands are blocking calls with deterministic deadlines over an
//! asynchronous wire: the engine registers a pending request with the
//! dispatcher *before* writing the frame, so a response can never race
//! past its waiter, then parks the caller on a oneshot until fulfillment
//! or timeout. Expiry purges the pending entry — a response arriving late
//! is dropped by the dispatcher, not misdelivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};

use meshlink_core::{
    Addr16, Addr64, AtStatus, DiscoveryEvent, Error, LinkEvent, OperatingMode, Result, Transport,
};

use crate::at;
use crate::discovery::ScanControl;
use crate::dispatch::{Dispatcher, FrameListener, FramePredicate, ListenerCategory, ListenerId};
use crate::frame::Frame;
use crate::reader::{self, LinkIo};
use crate::wire;

/// Capacity of the connection-event broadcast channel.
const EVENT_CAPACITY: usize = 16;

/// Capacity of the discovery-event broadcast channel.
const DISCOVERY_EVENT_CAPACITY: usize = 64;

/// Per-connection protocol engine.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`. Every
/// connection owns its own frame-id pool, pending-request table, and
/// listener registries — nothing is shared between devices.
pub struct RadioLink {
    mode: OperatingMode,
    closed: AtomicBool,
    connected: Arc<AtomicBool>,
    /// Handle to the link task; `None` in legacy mode, taken on close.
    io: StdMutex<Option<LinkIo>>,
    /// The transport itself in legacy mode; the mutex serializes commands.
    legacy: Option<Mutex<Box<dyn Transport>>>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<LinkEvent>,
    pub(crate) discovery_events: broadcast::Sender<DiscoveryEvent>,
    pub(crate) scan: StdMutex<ScanControl>,
    next_frame_id: StdMutex<u8>,
    command_timeout: Duration,
    pub(crate) discovery_timeout: Option<Duration>,
}

impl RadioLink {
    /// Construct an engine for a connection classified as framed API mode.
    /// Spawns the background link task, which takes ownership of the
    /// transport.
    pub(crate) fn open_api(
        transport: Box<dyn Transport>,
        mode: OperatingMode,
        command_timeout: Duration,
        discovery_timeout: Option<Duration>,
    ) -> Self {
        debug_assert!(mode.is_api());
        let escaped = mode == OperatingMode::ApiEscaped;

        let dispatcher = Arc::new(Dispatcher::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (discovery_events, _) = broadcast::channel(DISCOVERY_EVENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let io = reader::spawn_link_task(
            transport,
            escaped,
            Arc::clone(&dispatcher),
            events.clone(),
            Arc::clone(&connected),
        );
        let _ = events.send(LinkEvent::Connected);

        RadioLink {
            mode,
            closed: AtomicBool::new(false),
            connected,
            io: StdMutex::new(Some(io)),
            legacy: None,
            dispatcher,
            events,
            discovery_events,
            scan: StdMutex::new(ScanControl::default()),
            next_frame_id: StdMutex::new(1),
            command_timeout,
            discovery_timeout,
        }
    }

    /// Construct an engine for a connection classified as legacy AT mode.
    /// No link task runs; the engine keeps the transport and serializes
    /// text exchanges on it.
    pub(crate) fn open_legacy(transport: Box<dyn Transport>, command_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (discovery_events, _) = broadcast::channel(DISCOVERY_EVENT_CAPACITY);
        let _ = events.send(LinkEvent::Connected);

        RadioLink {
            mode: OperatingMode::Legacy,
            closed: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(true)),
            io: StdMutex::new(None),
            legacy: Some(Mutex::new(transport)),
            dispatcher: Arc::new(Dispatcher::new()),
            events,
            discovery_events,
            scan: StdMutex::new(ScanControl::default()),
            next_frame_id: StdMutex::new(1),
            command_timeout,
            discovery_timeout: None,
        }
    }

    // -----------------------------------------------------------------
    // State
    // -----------------------------------------------------------------

    /// The operating mode this connection was classified as.
    pub fn operating_mode(&self) -> OperatingMode {
        self.mode
    }

    /// `true` while the connection is open and the link is alive.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    /// The default deadline applied to commands without an explicit one.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::NotOpen);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::ConnectionLost);
        }
        Ok(())
    }

    /// Guard for API-only operations. Returns whether escaping is active.
    fn api_escaped(&self) -> Result<bool> {
        self.check_open()?;
        match self.mode {
            OperatingMode::Api => Ok(false),
            OperatingMode::ApiEscaped => Ok(true),
            other => Err(Error::InvalidOperatingMode(other)),
        }
    }

    /// Subscribe to connection-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Subscribe to discovery events. Safe to call before a scan starts.
    pub fn subscribe_discovery(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.discovery_events.subscribe()
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    /// Execute a configuration command with the default timeout.
    ///
    /// Works in both framed API mode and legacy AT mode. Returns the
    /// response value bytes; a non-OK status surfaces as
    /// [`Error::CommandRejected`].
    pub async fn execute_command(&self, command: &str, parameter: &[u8]) -> Result<Vec<u8>> {
        self.execute_command_timeout(command, parameter, self.command_timeout)
            .await
    }

    /// Execute a configuration command with an explicit deadline.
    pub async fn execute_command_timeout(
        &self,
        command: &str,
        parameter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let cmd = command_code(command)?;
        self.check_open()?;
        match self.mode {
            OperatingMode::Api | OperatingMode::ApiEscaped => {
                self.execute_api_command(cmd, parameter, timeout).await
            }
            OperatingMode::Legacy => self.execute_legacy_command(cmd, parameter, timeout).await,
            OperatingMode::Unknown => Err(Error::InvalidOperatingMode(OperatingMode::Unknown)),
        }
    }

    async fn execute_api_command(
        &self,
        cmd: [u8; 2],
        parameter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let escaped = self.api_escaped()?;
        let (frame_id, rx) = self.allocate_pending(|id| {
            Box::new(move |f| matches!(f, Frame::AtResponse { frame_id, .. } if *frame_id == id))
        })?;
        let frame = Frame::AtCommand {
            frame_id,
            command: cmd,
            parameter: parameter.to_vec(),
        };

        match self.transact(frame, frame_id, rx, timeout, escaped).await? {
            Frame::AtResponse { status, value, .. } => {
                if status.is_ok() {
                    Ok(value)
                } else {
                    Err(Error::CommandRejected(status))
                }
            }
            other => Err(Error::Protocol(format!(
                "unexpected response kind 0x{:02X}",
                other.frame_type()
            ))),
        }
    }

    async fn execute_legacy_command(
        &self,
        cmd: [u8; 2],
        parameter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let transport = self.legacy.as_ref().ok_or(Error::NotOpen)?;
        // One legacy exchange at a time: without a correlation token, a
        // response can only be attributed to the single command in flight.
        let mut t = transport.lock().await;
        t.send(&at::encode_command(cmd, parameter)).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut acc: Vec<u8> = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match at::decode_reply(&acc) {
                at::DecodeResult::Reply { value, .. } => return Ok(value),
                at::DecodeResult::Error { .. } => {
                    return Err(Error::CommandRejected(AtStatus::Error));
                }
                at::DecodeResult::Incomplete => {}
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let n = t.receive(&mut buf, remaining).await?;
            acc.extend_from_slice(&buf[..n]);
        }
    }

    // -----------------------------------------------------------------
    // Raw frames
    // -----------------------------------------------------------------

    /// Encode and write a frame without waiting for anything in return.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let escaped = self.api_escaped()?;
        self.write_bytes(wire::encode(frame, escaped)).await
    }

    /// Write a frame and block until an inbound frame satisfies
    /// `predicate` or the deadline elapses.
    ///
    /// The frame must carry a nonzero frame id: correlation is by id, and
    /// the predicate is only consulted for frames carrying that id.
    pub async fn send_frame_and_wait<P>(
        &self,
        frame: Frame,
        predicate: P,
        timeout: Duration,
    ) -> Result<Frame>
    where
        P: Fn(&Frame) -> bool + Send + Sync + 'static,
    {
        let escaped = self.api_escaped()?;
        let frame_id = frame.frame_id().filter(|&id| id != 0).ok_or_else(|| {
            Error::Protocol("frame must carry a nonzero frame id to await a response".into())
        })?;
        let rx = self
            .dispatcher
            .register_pending(frame_id, Box::new(predicate))?;
        self.transact(frame, frame_id, rx, timeout, escaped).await
    }

    // -----------------------------------------------------------------
    // Data transmission
    // -----------------------------------------------------------------

    /// Send an application payload and wait for the delivery report.
    ///
    /// A non-delivered status surfaces as [`Error::TransmitFailed`].
    pub async fn send_data(&self, dest64: Addr64, dest16: Addr16, payload: &[u8]) -> Result<()> {
        let escaped = self.api_escaped()?;
        let (frame_id, rx) = self.allocate_pending(|id| {
            Box::new(move |f| matches!(f, Frame::TransmitStatus { frame_id, .. } if *frame_id == id))
        })?;
        let frame = Frame::TransmitRequest {
            frame_id,
            dest64,
            dest16,
            radius: 0,
            options: 0,
            payload: payload.to_vec(),
        };

        match self
            .transact(frame, frame_id, rx, self.command_timeout, escaped)
            .await?
        {
            Frame::TransmitStatus { delivery, .. } => {
                if delivery.is_delivered() {
                    Ok(())
                } else {
                    Err(Error::TransmitFailed(delivery))
                }
            }
            other => Err(Error::Protocol(format!(
                "unexpected response kind 0x{:02X}",
                other.frame_type()
            ))),
        }
    }

    /// Send an application payload without soliciting a delivery report
    /// (frame id 0).
    pub async fn send_data_async(
        &self,
        dest64: Addr64,
        dest16: Addr16,
        payload: &[u8],
    ) -> Result<()> {
        let frame = Frame::TransmitRequest {
            frame_id: 0,
            dest64,
            dest16,
            radius: 0,
            options: 0,
            payload: payload.to_vec(),
        };
        self.send_frame(&frame).await
    }

    /// Broadcast an application payload to every node in range.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        self.send_data(Addr64::BROADCAST, Addr16::UNKNOWN, payload)
            .await
    }

    // -----------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------

    /// Register a listener for a frame category.
    pub fn listen(&self, category: ListenerCategory) -> Result<FrameListener> {
        self.api_escaped()?;
        Ok(self.dispatcher.register_listener(category))
    }

    /// Remove a previously registered listener.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.dispatcher.unregister_listener(id)
    }

    // -----------------------------------------------------------------
    // Internals shared with the discovery machinery
    // -----------------------------------------------------------------

    /// Allocate a free frame id and register a pending request under it.
    ///
    /// Ids cycle through 1..=255 (0 is reserved) and an id currently in
    /// flight is skipped — it becomes reusable only after its pending
    /// entry resolves or expires.
    pub(crate) fn allocate_pending<F>(&self, predicate_for: F) -> Result<(u8, oneshot::Receiver<Frame>)>
    where
        F: Fn(u8) -> FramePredicate,
    {
        let mut next = self.next_frame_id.lock().unwrap();
        for _ in 0..255 {
            let id = *next;
            *next = if *next == 255 { 1 } else { *next + 1 };
            match self.dispatcher.register_pending(id, predicate_for(id)) {
                Ok(rx) => return Ok((id, rx)),
                Err(Error::IllegalState(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::IllegalState(
            "all 255 frame ids have requests in flight".into(),
        ))
    }

    /// Write an already-registered request frame and await its response.
    pub(crate) async fn transact(
        &self,
        frame: Frame,
        frame_id: u8,
        rx: oneshot::Receiver<Frame>,
        timeout: Duration,
        escaped: bool,
    ) -> Result<Frame> {
        if let Err(e) = self.write_bytes(wire::encode(&frame, escaped)).await {
            self.dispatcher.forget_pending(frame_id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.dispatcher.forget_pending(frame_id);
                Err(Error::ConnectionLost)
            }
            Err(_) => {
                self.dispatcher.forget_pending(frame_id);
                Err(Error::Timeout)
            }
        }
    }

    /// Queue encoded bytes for the link task to write.
    pub(crate) async fn write_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        let write_tx = {
            let io = self.io.lock().unwrap();
            io.as_ref().ok_or(Error::NotOpen)?.write_tx.clone()
        };
        let (done_tx, done_rx) = oneshot::channel();
        write_tx
            .send(reader::WriteRequest::Bytes {
                bytes,
                done: done_tx,
            })
            .await
            .map_err(|_| Error::ConnectionLost)?;
        done_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// `true` when this link is in escaped API mode. Internal helper for
    /// the discovery machinery.
    pub(crate) fn is_escaped(&self) -> Result<bool> {
        self.api_escaped()
    }

    // -----------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------

    /// Close the connection.
    ///
    /// Cancels a running discovery scan, stops the link task, and closes
    /// the transport. In-flight commands expire on their own deadlines.
    /// Idempotent; operations after close fail with
    /// [`Error::NotOpen`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let scan_cancel = self.scan.lock().unwrap().cancel.clone();
        if let Some(cancel) = scan_cancel {
            cancel.cancel();
        }

        let io = self.io.lock().unwrap().take();
        if let Some(io) = io {
            if let Some(mut transport) = io.shutdown().await {
                let _ = transport.close().await;
            }
        }
        if let Some(legacy) = &self.legacy {
            let mut t = legacy.lock().await;
            let _ = t.close().await;
        }
        Ok(())
    }
}

/// Validate and pack a two-character command name.
pub(crate) fn command_code(command: &str) -> Result<[u8; 2]> {
    let bytes = command.as_bytes();
    if bytes.len() != 2 {
        return Err(Error::Protocol(format!(
            "command name must be exactly two characters, got {command:?}"
        )));
    }
    Ok([bytes[0], bytes[1]])
}
