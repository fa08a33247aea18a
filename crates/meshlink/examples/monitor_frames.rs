//! Monitor inbound frames and connection events.
//!
//! Registers listeners for received data and modem status frames and
//! prints everything that arrives for 60 seconds. Useful for watching a
//! sensor network, or for debugging a module's unsolicited traffic.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p meshlink --example monitor_frames
//! ```

use std::time::Duration;

use meshlink::{DeviceBuilder, Frame, LinkEvent, ListenerCategory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let radio = DeviceBuilder::new()
        .serial_port("/dev/ttyUSB0")
        .baud_rate(9_600)
        .open()
        .await?;

    let mut data = radio.listen(ListenerCategory::Data)?;
    let mut modem = radio.listen(ListenerCategory::ModemStatus)?;
    let mut events = radio.subscribe();

    println!("Monitoring for 60 seconds...\n");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,

            Some(frame) = data.rx.recv() => {
                if let Frame::Receive { src64, src16, payload, .. } = frame {
                    println!("data  {} ({}) {} bytes: {:02X?}",
                        src64, src16, payload.len(), payload);
                }
            }

            Some(frame) = modem.rx.recv() => {
                if let Frame::ModemStatus { status } = frame {
                    println!("modem status: {:?}", status);
                }
            }

            Ok(event) = events.recv() => {
                println!("link event: {:?}", event);
                if event == LinkEvent::ConnectionLost {
                    break;
                }
            }
        }
    }

    println!("\nMonitoring complete.");
    radio.close().await?;
    Ok(())
}
