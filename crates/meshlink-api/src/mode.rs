//! Operating-mode probing.
//!
//! A freshly opened transport could lead to a module in framed API mode
//! (escaped or not), in legacy AT text mode, or to something that is not a
//! module at all. Classification happens once, when the connection opens,
//! before the link task starts — the probe is the only code that reads the
//! transport directly.
//!
//! The probe sequence:
//!
//! 1. Send a framed query for the reserved, harmless `AP` parameter. The
//!    probe frame contains no escapable bytes, so modules in either API
//!    mode parse it. A response classifies the link by the reported value
//!    (`2` means escaped), falling back to an escaped re-decode of the
//!    captured bytes in case the value itself arrived escaped.
//! 2. Failing that, send the `+++` command-mode sequence; an `OK` reply
//!    classifies the link as legacy.
//! 3. Otherwise the mode is unknown and the connection is rejected.

use std::time::Duration;

use meshlink_core::{Error, OperatingMode, Result, Transport};

use crate::frame::Frame;
use crate::wire::{self, Decoder};

/// Frame id used by the probe command. The engine's allocator starts at 1
/// as well, but the probe's pending window closes before the engine exists.
pub(crate) const PROBE_FRAME_ID: u8 = 1;

/// `AP` value reported by modules running with escaping enabled.
const AP_ESCAPED: u8 = 2;

/// Classify the module on the other end of `transport`.
///
/// Transport I/O failures abort the probe; an unresponsive or
/// unintelligible peer yields [`OperatingMode::Unknown`].
pub(crate) async fn probe(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<OperatingMode> {
    if let Some(mode) = probe_api(transport, timeout).await? {
        return Ok(mode);
    }
    if probe_legacy(transport, timeout).await? {
        return Ok(OperatingMode::Legacy);
    }
    Ok(OperatingMode::Unknown)
}

/// Build the reserved probe frame: a framed `AP` parameter query.
pub(crate) fn probe_frame() -> Frame {
    Frame::AtCommand {
        frame_id: PROBE_FRAME_ID,
        command: *b"AP",
        parameter: Vec::new(),
    }
}

async fn probe_api(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Option<OperatingMode>> {
    transport.send(&wire::encode(&probe_frame(), false)).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut captured = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match transport.receive(&mut buf, remaining).await {
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                if let Some(mode) = classify_capture(&captured) {
                    tracing::debug!(%mode, "probe classified connection");
                    return Ok(Some(mode));
                }
            }
            Err(Error::Timeout) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Look for the probe response in the captured bytes, trying the plain
/// codec first and the escaped codec second.
fn classify_capture(captured: &[u8]) -> Option<OperatingMode> {
    if let Some(value) = find_probe_response(captured, false) {
        return Some(if value.first() == Some(&AP_ESCAPED) {
            OperatingMode::ApiEscaped
        } else {
            OperatingMode::Api
        });
    }
    if find_probe_response(captured, true).is_some() {
        return Some(OperatingMode::ApiEscaped);
    }
    None
}

fn find_probe_response(captured: &[u8], escaped: bool) -> Option<Vec<u8>> {
    let mut decoder = Decoder::new(escaped);
    decoder.extend(captured);
    while let Some(frame) = decoder.next_frame() {
        if let Frame::AtResponse {
            frame_id: PROBE_FRAME_ID,
            command,
            status,
            value,
        } = frame
        {
            if command == *b"AP" && status.is_ok() {
                return Some(value);
            }
        }
    }
    None
}

async fn probe_legacy(transport: &mut dyn Transport, timeout: Duration) -> Result<bool> {
    use crate::at;

    transport.send(at::COMMAND_MODE_SEQUENCE).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut captured = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        match transport.receive(&mut buf, remaining).await {
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                if captured
                    .windows(3)
                    .any(|w| w == [at::OK_REPLY[0], at::OK_REPLY[1], at::TERMINATOR])
                {
                    return Ok(true);
                }
            }
            Err(Error::Timeout) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}
