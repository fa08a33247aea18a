//! Scriptable mock transport for protocol-engine tests.
//!
//! [`MockTransport`] implements the [`Transport`] trait over an in-memory
//! byte queue. The transport half is handed to the engine (which moves it
//! into its background link task); the paired [`MockHandle`] stays with
//! the test and scripts the other end of the wire.
//!
//! # Example
//!
//! ```
//! use meshlink_test_harness::MockTransport;
//!
//! let (transport, handle) = MockTransport::duplex();
//! // Pre-load: when the engine sends this request, return this response.
//! handle.expect(&[0x7E, 0x00, 0x04, 0x08, 0x01, 0x41, 0x50, 0x65],
//!               &[0x7E, 0x00, 0x06, 0x88, 0x01, 0x41, 0x50, 0x00, 0x01, 0x34]);
//! // Or push unsolicited inbound bytes at any time:
//! handle.push(&[0x7E, 0x00, 0x02, 0x8A, 0x02, 0x73]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshlink_core::{Error, Result, Transport};

/// Poll interval while a `receive()` call waits for scripted bytes.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A pre-loaded request/response pair.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes queued inbound when the matching request is received.
    response: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Bytes waiting to be returned by `receive()`.
    inbound: VecDeque<u8>,
    /// Log of all `send()` calls, one entry per call.
    sent: Vec<Vec<u8>>,
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    connected: bool,
    /// When set, every `receive()` fails with `ConnectionLost`.
    fail_reads: bool,
}

/// The engine-side half of the mock: a [`Transport`] implementation.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

/// The test-side half of the mock: scripts and inspects the wire.
#[derive(Debug, Clone)]
pub struct MockHandle {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// Create a connected transport/handle pair.
    pub fn duplex() -> (MockTransport, MockHandle) {
        let inner = Arc::new(Mutex::new(Inner {
            connected: true,
            ..Inner::default()
        }));
        (
            MockTransport {
                inner: Arc::clone(&inner),
            },
            MockHandle { inner },
        )
    }
}

impl MockHandle {
    /// Queue bytes to arrive on the engine's next `receive()` call, as if
    /// the module sent them unsolicited.
    pub fn push(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().inbound.extend(bytes);
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, `response` is
    /// queued inbound. A `send()` that mismatches the next expectation
    /// fails the test with a protocol error.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .expectations
            .push_back(Expectation {
                request: request.to_vec(),
                response: response.to_vec(),
            });
    }

    /// Everything the engine has sent, one entry per `send()` call.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.inner.lock().unwrap().expectations.len()
    }

    /// Make every subsequent `receive()` fail with `ConnectionLost`,
    /// simulating a dead serial adapter or closed socket.
    pub fn fail_reads(&self) {
        self.inner.lock().unwrap().fail_reads = true;
    }

    /// Mark the transport disconnected; both directions fail `NotOpen`.
    pub fn disconnect(&self) {
        self.inner.lock().unwrap().connected = false;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(Error::NotOpen);
        }
        inner.sent.push(data.to_vec());

        // Auto-respond when the write matches the next scripted exchange.
        // Writes with no expectations pending are simply recorded.
        if let Some(expectation) = inner.expectations.front() {
            if data == expectation.request.as_slice() {
                let expectation = inner.expectations.pop_front().unwrap();
                inner.inbound.extend(&expectation.response);
            } else {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.fail_reads {
                    return Err(Error::ConnectionLost);
                }
                if !inner.connected {
                    return Err(Error::NotOpen);
                }
                if !inner.inbound.is_empty() {
                    let n = inner.inbound.len().min(buf.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = inner.inbound.pop_front().unwrap();
                    }
                    return Ok(n);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }
}
