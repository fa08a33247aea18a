//! Network discovery.
//!
//! A discovery run solicits identity announcements from every reachable
//! node: the engine sends an `ND` command request, and the dispatcher fans
//! the resulting discovery-notice frames to an internal listener. Each
//! first sighting of a 64-bit address is reported to discovery subscribers
//! in arrival order; duplicates within a run are suppressed silently
//! (dedup keys on the 64-bit address — the stable device identity).
//!
//! A run ends one of three ways, always emitting a final
//! [`DiscoveryEvent::Finished`]:
//!
//! - `Completed` — the module answered the `ND` request, signalling
//!   end-of-discovery;
//! - `TimedOut` — the network-wide timeout elapsed (configured, or read
//!   from the module's `NT` parameter in 100 ms units);
//! - `Stopped` — [`stop`] was called.
//!
//! Only one run per connection may be active at a time; starting a second
//! is an illegal-state error.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use meshlink_core::{Addr64, DiscoveryEvent, Error, FinishReason, RemoteNode, Result};

use crate::command::RadioLink;
use crate::dispatch::{FrameListener, ListenerCategory};
use crate::frame::Frame;
use crate::wire;

/// Scan timeout used when neither the caller nor the module provides one.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(6);

/// The module's `NT` parameter counts in units of 100 ms.
const NT_UNIT_MS: u64 = 100;

/// Options for a discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Overall scan deadline. When `None`, the builder-level override
    /// applies, then the module's `NT` setting, then
    /// [`DEFAULT_DISCOVERY_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// When a seen 64-bit address announces again with updated fields
    /// (e.g. a reassigned 16-bit address), update the stored record. The
    /// duplicate is still not re-reported to subscribers.
    pub refresh_records: bool,
}

/// Per-connection scan bookkeeping, owned by the engine.
#[derive(Debug, Default)]
pub(crate) struct ScanControl {
    pub running: bool,
    pub cancel: Option<CancellationToken>,
}

/// Start a network-wide discovery run.
///
/// Returns as soon as the request is on the wire; results arrive as
/// [`DiscoveryEvent`]s on [`RadioLink::subscribe_discovery`].
pub async fn start(link: Arc<RadioLink>, config: DiscoveryConfig) -> Result<()> {
    start_scan(link, config, None).await
}

/// Stop a running discovery run early.
///
/// Cooperative: notifications already dispatched finish processing, then
/// the run ends with [`FinishReason::Stopped`].
pub fn stop(link: &RadioLink) -> Result<()> {
    let scan = link.scan.lock().unwrap();
    if !scan.running {
        return Err(Error::IllegalState("no discovery scan is running".into()));
    }
    if let Some(cancel) = &scan.cancel {
        cancel.cancel();
    }
    Ok(())
}

/// Run a full scan and block until it finishes, returning the collection.
pub async fn discover_network(
    link: Arc<RadioLink>,
    config: DiscoveryConfig,
) -> Result<Vec<RemoteNode>> {
    let mut events = link.subscribe_discovery();
    start(Arc::clone(&link), config).await?;
    loop {
        match events.recv().await {
            Ok(DiscoveryEvent::Finished { devices, .. }) => return Ok(devices),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err(Error::ConnectionLost),
        }
    }
}

/// Look up a single device by its node identifier.
///
/// Runs the scan machinery restricted to one identifier and resolves on
/// the first match; the scan-level timeout bounds the wait. `Ok(None)`
/// means the scan finished without a sighting.
pub async fn discover_device(
    link: Arc<RadioLink>,
    node_id: &str,
    config: DiscoveryConfig,
) -> Result<Option<RemoteNode>> {
    let mut events = link.subscribe_discovery();
    start_scan(Arc::clone(&link), config, Some(node_id.to_string())).await?;
    loop {
        match events.recv().await {
            Ok(DiscoveryEvent::DeviceDiscovered(node)) if node.node_id == node_id => {
                // The lookup is satisfied; end the scan early. The run may
                // have finished on its own in the meantime.
                let _ = stop(&link);
                return Ok(Some(node));
            }
            Ok(DiscoveryEvent::Finished { devices, .. }) => {
                return Ok(devices.into_iter().find(|n| n.node_id == node_id));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err(Error::ConnectionLost),
        }
    }
}

async fn start_scan(
    link: Arc<RadioLink>,
    config: DiscoveryConfig,
    target: Option<String>,
) -> Result<()> {
    link.is_escaped()?;

    let cancel = CancellationToken::new();
    {
        let mut scan = link.scan.lock().unwrap();
        if scan.running {
            return Err(Error::IllegalState("discovery already running".into()));
        }
        scan.running = true;
        scan.cancel = Some(cancel.clone());
    }

    match arm_scan(&link, &config, target).await {
        Ok((listener, done_rx, frame_id, timeout)) => {
            debug!(?timeout, "discovery scan started");
            tokio::spawn(run_scan(
                link,
                listener,
                done_rx,
                frame_id,
                timeout,
                cancel,
                config.refresh_records,
            ));
            Ok(())
        }
        Err(e) => {
            let mut scan = link.scan.lock().unwrap();
            scan.running = false;
            scan.cancel = None;
            Err(e)
        }
    }
}

/// Resolve the timeout, register the internal listener and the pending
/// end-of-discovery request, and put the `ND` request on the wire.
///
/// The listener is registered before the write so no notice can slip past.
async fn arm_scan(
    link: &Arc<RadioLink>,
    config: &DiscoveryConfig,
    target: Option<String>,
) -> Result<(FrameListener, oneshot::Receiver<Frame>, u8, Duration)> {
    let timeout = resolve_timeout(link, config).await;

    let listener = link.dispatcher.register_listener(ListenerCategory::Discovery);
    let (frame_id, done_rx) = match link.allocate_pending(|id| {
        Box::new(move |f| {
            matches!(f, Frame::AtResponse { frame_id, command, .. }
                if *frame_id == id && command == b"ND")
        })
    }) {
        Ok(pair) => pair,
        Err(e) => {
            link.dispatcher.unregister_listener(listener.id);
            return Err(e);
        }
    };

    let frame = Frame::AtCommand {
        frame_id,
        command: *b"ND",
        parameter: target.map(String::into_bytes).unwrap_or_default(),
    };
    let escaped = link.is_escaped()?;
    if let Err(e) = link.write_bytes(wire::encode(&frame, escaped)).await {
        link.dispatcher.unregister_listener(listener.id);
        link.dispatcher.forget_pending(frame_id);
        return Err(e);
    }

    Ok((listener, done_rx, frame_id, timeout))
}

/// Pick the scan deadline: explicit config, builder override, the module's
/// `NT` setting, or the library default — in that order.
async fn resolve_timeout(link: &RadioLink, config: &DiscoveryConfig) -> Duration {
    if let Some(t) = config.timeout.or(link.discovery_timeout) {
        return t;
    }
    match link.execute_command("NT", &[]).await {
        Ok(value) if !value.is_empty() && value.len() <= 4 => {
            let units = value.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            Duration::from_millis(units * NT_UNIT_MS)
        }
        Ok(_) => DEFAULT_DISCOVERY_TIMEOUT,
        Err(e) => {
            debug!(error = %e, "NT read failed, using default discovery timeout");
            DEFAULT_DISCOVERY_TIMEOUT
        }
    }
}

async fn run_scan(
    link: Arc<RadioLink>,
    mut listener: FrameListener,
    mut done_rx: oneshot::Receiver<Frame>,
    frame_id: u8,
    timeout: Duration,
    cancel: CancellationToken,
    refresh_records: bool,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut devices: Vec<RemoteNode> = Vec::new();
    let mut seen: HashMap<Addr64, usize> = HashMap::new();

    let reason = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break FinishReason::Stopped,

            res = &mut done_rx => {
                break match res {
                    Ok(_) => FinishReason::Completed,
                    // The pending entry vanished without a response; the
                    // link is going away.
                    Err(_) => FinishReason::Stopped,
                };
            }

            maybe = listener.rx.recv() => match maybe {
                Some(Frame::DiscoveryNotice { node }) => {
                    match seen.entry(node.addr64) {
                        Entry::Vacant(slot) => {
                            slot.insert(devices.len());
                            devices.push(node.clone());
                            let _ = link
                                .discovery_events
                                .send(DiscoveryEvent::DeviceDiscovered(node));
                        }
                        Entry::Occupied(slot) => {
                            // Duplicates are suppressed silently; the
                            // stored record is refreshed only on request.
                            if refresh_records {
                                devices[*slot.get()] = node;
                            }
                        }
                    }
                }
                Some(_) => {}
                None => break FinishReason::Stopped,
            },

            _ = tokio::time::sleep_until(deadline) => break FinishReason::TimedOut,
        }
    };

    // Once the run leaves its running phase, no further notices are
    // accepted: the listener goes away before the final notification.
    link.dispatcher.unregister_listener(listener.id);
    link.dispatcher.forget_pending(frame_id);
    {
        let mut scan = link.scan.lock().unwrap();
        scan.running = false;
        scan.cancel = None;
    }

    debug!(?reason, count = devices.len(), "discovery scan finished");
    let _ = link
        .discovery_events
        .send(DiscoveryEvent::Finished { reason, devices });
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlink_core::{Addr16, AtStatus, DeviceType, OperatingMode};
    use meshlink_test_harness::{MockHandle, MockTransport};

    fn open_link() -> (Arc<RadioLink>, MockHandle) {
        let (transport, handle) = MockTransport::duplex();
        let link = RadioLink::open_api(
            Box::new(transport),
            OperatingMode::Api,
            Duration::from_millis(200),
            None,
        );
        (Arc::new(link), handle)
    }

    fn node(addr: u64, addr16: u16, name: &str) -> RemoteNode {
        RemoteNode {
            addr64: Addr64(addr),
            addr16: Addr16(addr16),
            node_id: name.into(),
            device_type: DeviceType::Router,
        }
    }

    fn notice_bytes(node: &RemoteNode) -> Vec<u8> {
        wire::encode(&Frame::DiscoveryNotice { node: node.clone() }, false)
    }

    fn nd_request(frame_id: u8, parameter: &[u8]) -> Vec<u8> {
        wire::encode(
            &Frame::AtCommand {
                frame_id,
                command: *b"ND",
                parameter: parameter.to_vec(),
            },
            false,
        )
    }

    fn nd_done(frame_id: u8) -> Vec<u8> {
        wire::encode(
            &Frame::AtResponse {
                frame_id,
                command: *b"ND",
                status: AtStatus::Ok,
                value: vec![],
            },
            false,
        )
    }

    fn quick(timeout_ms: u64) -> DiscoveryConfig {
        DiscoveryConfig {
            timeout: Some(Duration::from_millis(timeout_ms)),
            ..DiscoveryConfig::default()
        }
    }

    #[tokio::test]
    async fn scan_deduplicates_by_address() {
        let (link, handle) = open_link();
        let mut events = link.subscribe_discovery();

        start(Arc::clone(&link), quick(1_000)).await.unwrap();
        assert_eq!(handle.sent(), vec![nd_request(1, &[])]);

        let a = node(0x0013_A200_0000_0001, 0x1111, "ALPHA");
        let b = node(0x0013_A200_0000_0002, 0x2222, "BETA");
        handle.push(&notice_bytes(&a));
        handle.push(&notice_bytes(&a)); // duplicate, suppressed silently
        handle.push(&notice_bytes(&b));
        handle.push(&nd_done(1));

        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::DeviceDiscovered(a.clone())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::DeviceDiscovered(b.clone())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Finished {
                reason: FinishReason::Completed,
                devices: vec![a, b],
            }
        );
    }

    #[tokio::test]
    async fn scan_times_out_without_end_signal() {
        let (link, handle) = open_link();
        let mut events = link.subscribe_discovery();

        start(Arc::clone(&link), quick(50)).await.unwrap();
        let a = node(1, 1, "A");
        handle.push(&notice_bytes(&a));

        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::DeviceDiscovered(a.clone())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Finished {
                reason: FinishReason::TimedOut,
                devices: vec![a],
            }
        );
    }

    #[tokio::test]
    async fn stop_ends_scan_early() {
        let (link, _handle) = open_link();
        let mut events = link.subscribe_discovery();

        start(Arc::clone(&link), quick(5_000)).await.unwrap();
        stop(&link).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Finished {
                reason: FinishReason::Stopped,
                devices: vec![],
            }
        );
    }

    #[tokio::test]
    async fn stop_without_scan_is_illegal_state() {
        let (link, _handle) = open_link();
        assert!(matches!(stop(&link), Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn second_start_while_running_is_illegal_state() {
        let (link, handle) = open_link();
        let mut events = link.subscribe_discovery();

        start(Arc::clone(&link), quick(1_000)).await.unwrap();
        let result = start(Arc::clone(&link), quick(1_000)).await;
        assert!(matches!(result, Err(Error::IllegalState(_))));

        // After the first run finishes, a new scan may start.
        handle.push(&nd_done(1));
        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Finished { .. }
        ));
        start(Arc::clone(&link), quick(50)).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_records_updates_stored_record_only() {
        let (link, handle) = open_link();
        let mut events = link.subscribe_discovery();

        let config = DiscoveryConfig {
            timeout: Some(Duration::from_millis(1_000)),
            refresh_records: true,
        };
        start(Arc::clone(&link), config).await.unwrap();

        let old = node(0x42, 0x1111, "NODE");
        // Same 64-bit address, reassigned 16-bit address.
        let updated = node(0x42, 0x9999, "NODE");
        handle.push(&notice_bytes(&old));
        handle.push(&notice_bytes(&updated));
        handle.push(&nd_done(1));

        // Exactly one sighting is reported, but the final collection
        // carries the refreshed record.
        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::DeviceDiscovered(old)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Finished {
                reason: FinishReason::Completed,
                devices: vec![updated],
            }
        );
    }

    #[tokio::test]
    async fn discover_network_collects_until_finished() {
        let (link, handle) = open_link();

        let a = node(1, 1, "A");
        let b = node(2, 2, "B");
        let pusher = {
            let handle = handle.clone();
            let a = a.clone();
            let b = b.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                handle.push(&notice_bytes(&a));
                handle.push(&notice_bytes(&b));
                handle.push(&nd_done(1));
            })
        };

        let devices = discover_network(Arc::clone(&link), quick(2_000))
            .await
            .unwrap();
        assert_eq!(devices, vec![a, b]);
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn discover_device_resolves_on_first_match() {
        let (link, handle) = open_link();

        let target = node(7, 7, "PUMP");
        let pusher = {
            let handle = handle.clone();
            let target = target.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                handle.push(&notice_bytes(&node(6, 6, "OTHER")));
                handle.push(&notice_bytes(&target));
            })
        };

        let found = discover_device(Arc::clone(&link), "PUMP", quick(2_000))
            .await
            .unwrap();
        assert_eq!(found, Some(target));
        pusher.await.unwrap();

        // The targeted request carried the identifier as its parameter.
        assert_eq!(handle.sent(), vec![nd_request(1, b"PUMP")]);
    }

    #[tokio::test]
    async fn discover_device_times_out_to_none() {
        let (link, _handle) = open_link();
        let found = discover_device(Arc::clone(&link), "GHOST", quick(50))
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn nt_setting_supplies_scan_timeout() {
        let (link, handle) = open_link();
        let mut events = link.subscribe_discovery();

        // No configured timeout anywhere: the engine reads NT first.
        // NT = 2 units = 200 ms.
        handle.expect(
            &wire::encode(
                &Frame::AtCommand {
                    frame_id: 1,
                    command: *b"NT",
                    parameter: vec![],
                },
                false,
            ),
            &wire::encode(
                &Frame::AtResponse {
                    frame_id: 1,
                    command: *b"NT",
                    status: AtStatus::Ok,
                    value: vec![0x02],
                },
                false,
            ),
        );

        let started = tokio::time::Instant::now();
        start(Arc::clone(&link), DiscoveryConfig::default())
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Finished {
                reason: FinishReason::TimedOut,
                devices: vec![],
            }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
    }
}
