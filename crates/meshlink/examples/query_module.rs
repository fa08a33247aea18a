//! Query basic module parameters.
//!
//! Opens a serial connection, lets the probe classify the operating mode,
//! and reads the firmware version, 64-bit address, and node identifier.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p meshlink --example query_module
//! ```

use meshlink::{Addr64, CommandCapable, DeviceBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let serial_port = "/dev/ttyUSB0";
    println!("Opening {}...", serial_port);

    let radio = DeviceBuilder::new()
        .serial_port(serial_port)
        .baud_rate(9_600)
        .open()
        .await?;

    println!("Operating mode: {}", radio.operating_mode());

    let vr = radio.execute_command("VR", &[]).await?;
    println!("Firmware version: {:02X?}", vr);

    // The 64-bit address is read in two halves; each half may omit
    // leading zero bytes, so right-align them.
    let sh = radio.execute_command("SH", &[]).await?;
    let sl = radio.execute_command("SL", &[]).await?;
    let mut bytes = [0u8; 8];
    for (dst, src) in bytes[..4].iter_mut().rev().zip(sh.iter().rev()) {
        *dst = *src;
    }
    for (dst, src) in bytes[4..].iter_mut().rev().zip(sl.iter().rev()) {
        *dst = *src;
    }
    println!("Address: {}", Addr64::from_be_bytes(bytes));

    let ni = radio.execute_command("NI", &[]).await?;
    println!("Node identifier: {}", String::from_utf8_lossy(&ni));

    radio.close().await?;
    Ok(())
}
