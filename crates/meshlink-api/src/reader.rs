//! The background link task that owns the transport.
//!
//! One task is spawned per open API-mode connection. It is the only code
//! that touches the transport after open: outbound frames arrive over an
//! mpsc channel (serializing the wire — partial frames from concurrent
//! writers can never interleave), and inbound bytes are drained
//! continuously, decoded, and handed to the [`Dispatcher`].
//!
//! On a transport read error the task emits
//! [`LinkEvent::ConnectionLost`], marks the link down, and exits; it never
//! reconnects (retry policy belongs to the caller). On cooperative
//! shutdown it simply stops reading — pending requests are left to expire
//! on their own deadlines, preserving FIFO order for frames decoded before
//! the stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use meshlink_core::{Error, LinkEvent, Result, Transport};

use crate::dispatch::Dispatcher;
use crate::wire::Decoder;

/// Timeout for a single idle transport read. Bounds how long an outbound
/// write can queue behind the read arm of the select loop.
const IDLE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Backoff after an empty read so the loop yields to other work.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Reset threshold for the decode buffer if resync never converges.
const MAX_RX_BUF: usize = 8192;

/// An outbound request to the link task.
pub(crate) enum WriteRequest {
    /// Write pre-encoded frame bytes to the transport.
    Bytes {
        bytes: Vec<u8>,
        done: oneshot::Sender<Result<()>>,
    },
    /// Stop the loop and hand the transport back.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the link task. Owned by the engine.
pub(crate) struct LinkIo {
    pub write_tx: mpsc::Sender<WriteRequest>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl LinkIo {
    /// Queue frame bytes for transmission and wait for the write to land.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest::Bytes {
                bytes,
                done: done_tx,
            })
            .await
            .map_err(|_| Error::NotOpen)?;
        done_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Stop the link task and recover the transport, if the task is still
    /// running. Returns `None` when the task already exited (connection
    /// lost): there is nothing left to recover.
    pub async fn shutdown(self) -> Option<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .write_tx
            .send(WriteRequest::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            if let Ok(transport) = reply_rx.await {
                let _ = self.task.await;
                return Some(transport);
            }
        }
        // Loop already gone; make sure the task is not left behind.
        self.cancel.cancel();
        self.task.abort();
        None
    }
}

/// Spawn the link task for an API-mode connection.
pub(crate) fn spawn_link_task(
    transport: Box<dyn Transport>,
    escaped: bool,
    dispatcher: Arc<Dispatcher>,
    event_tx: broadcast::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
) -> LinkIo {
    let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(32);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let task = tokio::spawn(link_loop(
        transport,
        escaped,
        dispatcher,
        event_tx,
        connected,
        write_rx,
        cancel_clone,
    ));

    LinkIo {
        write_tx,
        cancel,
        task,
    }
}

/// The main loop of the link task.
///
/// `tokio::select! { biased }` ordering: cancellation, then outbound
/// writes, then idle reads — an in-flight read can delay a write by at
/// most [`IDLE_READ_TIMEOUT`].
async fn link_loop(
    mut transport: Box<dyn Transport>,
    escaped: bool,
    dispatcher: Arc<Dispatcher>,
    event_tx: broadcast::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) {
    let mut decoder = Decoder::new(escaped);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("link task cancelled");
                break;
            }

            req = write_rx.recv() => {
                match req {
                    Some(WriteRequest::Bytes { bytes, done }) => {
                        let result = transport.send(&bytes).await;
                        let _ = done.send(result);
                    }
                    Some(WriteRequest::Shutdown { reply }) => {
                        debug!("link task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("all writers dropped, exiting link task");
                        break;
                    }
                }
            }

            _ = async {
                let mut buf = [0u8; 256];
                match transport.receive(&mut buf, IDLE_READ_TIMEOUT).await {
                    Ok(n) if n > 0 => {
                        decoder.extend(&buf[..n]);
                        while let Some(frame) = decoder.next_frame() {
                            dispatcher.dispatch(frame);
                        }
                        if decoder.buffered() > MAX_RX_BUF {
                            tracing::warn!(
                                buffered = decoder.buffered(),
                                "receive buffer overflow, resetting decoder"
                            );
                            decoder.reset();
                        }
                    }
                    Ok(_) | Err(Error::Timeout) => {
                        tokio::time::sleep(IDLE_BACKOFF).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport read failed, stopping link task");
                        connected.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(LinkEvent::ConnectionLost);
                        cancel.cancel();
                    }
                }
            } => {}
        }
    }
}
