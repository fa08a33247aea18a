//! DeviceBuilder -- fluent construction of [`LocalRadio`] connections.
//!
//! Separates configuration from connection: serial or TCP parameters,
//! timeouts, and an optional operating-mode override are set up front,
//! then [`open`](DeviceBuilder::open) establishes the transport, probes
//! the module, and starts the engine.
//!
//! # Example
//!
//! ```no_run
//! use meshlink_api::DeviceBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> meshlink_core::Result<()> {
//! let radio = DeviceBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .baud_rate(9_600)
//!     .command_timeout(Duration::from_millis(750))
//!     .open()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use meshlink_core::{Error, OperatingMode, Result, Transport};
use meshlink_transport::{SerialTransport, TcpTransport};

use crate::command::RadioLink;
use crate::device::LocalRadio;
use crate::mode;

/// Fluent builder for [`LocalRadio`].
pub struct DeviceBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    tcp_addr: Option<String>,
    command_timeout: Duration,
    probe_timeout: Duration,
    discovery_timeout: Option<Duration>,
    operating_mode: Option<OperatingMode>,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        DeviceBuilder {
            serial_port: None,
            baud_rate: 9_600,
            tcp_addr: None,
            command_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            discovery_timeout: None,
            operating_mode: None,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (9600).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Connect over TCP instead of a serial port (e.g. a networked
    /// serial-device server in front of the module).
    pub fn tcp(mut self, addr: &str) -> Self {
        self.tcp_addr = Some(addr.to_string());
        self
    }

    /// Set the default deadline for a single command exchange (default: 1s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the deadline for each phase of the operating-mode probe
    /// (default: 2s).
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Override the network discovery timeout instead of reading the
    /// module's `NT` setting at scan start.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    /// Skip the probe and trust the caller's classification.
    ///
    /// Use when the module's mode is known and fixed; an override of
    /// [`OperatingMode::Unknown`] is rejected at open.
    pub fn operating_mode(mut self, mode: OperatingMode) -> Self {
        self.operating_mode = Some(mode);
        self
    }

    /// Open the configured transport and start the engine.
    pub async fn open(self) -> Result<LocalRadio> {
        let transport: Box<dyn Transport> = if let Some(port) = &self.serial_port {
            Box::new(SerialTransport::open(port, self.baud_rate).await?)
        } else if let Some(addr) = &self.tcp_addr {
            Box::new(TcpTransport::connect(addr).await?)
        } else {
            return Err(Error::Transport(
                "no serial port or TCP address configured".into(),
            ));
        };
        self.open_with_transport(transport).await
    }

    /// Start the engine on an already-open transport.
    ///
    /// This is the seam used by tests and by callers with custom
    /// transports.
    pub async fn open_with_transport(self, mut transport: Box<dyn Transport>) -> Result<LocalRadio> {
        let mode = match self.operating_mode {
            Some(mode) => mode,
            None => mode::probe(&mut *transport, self.probe_timeout).await?,
        };

        let link = match mode {
            OperatingMode::Api | OperatingMode::ApiEscaped => RadioLink::open_api(
                transport,
                mode,
                self.command_timeout,
                self.discovery_timeout,
            ),
            OperatingMode::Legacy => RadioLink::open_legacy(transport, self.command_timeout),
            OperatingMode::Unknown => {
                let _ = transport.close().await;
                return Err(Error::InvalidOperatingMode(OperatingMode::Unknown));
            }
        };
        Ok(LocalRadio::new(link))
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::wire;
    use meshlink_core::AtStatus;
    use meshlink_test_harness::MockTransport;

    #[tokio::test]
    async fn open_without_endpoint_fails() {
        let result = DeviceBuilder::new().open().await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn mode_override_skips_probe() {
        let (transport, handle) = MockTransport::duplex();
        let radio = DeviceBuilder::new()
            .operating_mode(OperatingMode::Api)
            .open_with_transport(Box::new(transport))
            .await
            .unwrap();

        // No probe traffic was generated.
        assert!(handle.sent().is_empty());
        assert_eq!(radio.operating_mode(), OperatingMode::Api);
        radio.close().await.unwrap();
    }

    #[tokio::test]
    async fn probe_classifies_and_opens_api_link() {
        let (transport, handle) = MockTransport::duplex();
        let probe_request = wire::encode(&crate::mode::probe_frame(), false);
        let probe_response = wire::encode(
            &Frame::AtResponse {
                frame_id: 1,
                command: *b"AP",
                status: AtStatus::Ok,
                value: vec![0x01],
            },
            false,
        );
        handle.expect(&probe_request, &probe_response);

        let radio = DeviceBuilder::new()
            .probe_timeout(Duration::from_millis(100))
            .open_with_transport(Box::new(transport))
            .await
            .unwrap();

        assert_eq!(radio.operating_mode(), OperatingMode::Api);
        assert!(radio.is_open());
        radio.close().await.unwrap();
    }

    #[tokio::test]
    async fn probe_opens_legacy_link() {
        let (transport, handle) = MockTransport::duplex();
        let probe_request = wire::encode(&crate::mode::probe_frame(), false);
        handle.expect(&probe_request, b"");
        handle.expect(b"+++", b"OK\r");
        handle.expect(b"ATVR\r", b"ABCD\r");

        let radio = DeviceBuilder::new()
            .probe_timeout(Duration::from_millis(30))
            .open_with_transport(Box::new(transport))
            .await
            .unwrap();
        assert_eq!(radio.operating_mode(), OperatingMode::Legacy);

        use crate::device::CommandCapable;
        let value = radio.execute_command("VR", &[]).await.unwrap();
        assert_eq!(value, b"ABCD");
    }

    #[tokio::test]
    async fn unclassifiable_connection_is_rejected() {
        let (transport, _handle) = MockTransport::duplex();
        let result = DeviceBuilder::new()
            .probe_timeout(Duration::from_millis(20))
            .open_with_transport(Box::new(transport))
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidOperatingMode(OperatingMode::Unknown))
        ));
    }

    #[tokio::test]
    async fn unknown_override_is_rejected() {
        let (transport, _handle) = MockTransport::duplex();
        let result = DeviceBuilder::new()
            .operating_mode(OperatingMode::Unknown)
            .open_with_transport(Box::new(transport))
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidOperatingMode(OperatingMode::Unknown))
        ));
    }
}
