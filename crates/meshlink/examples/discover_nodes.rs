//! Discover every reachable node on the radio network.
//!
//! Starts a network scan and prints devices as they announce themselves,
//! then the final deduplicated collection.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p meshlink --example discover_nodes
//! ```

use meshlink::{DeviceBuilder, DiscoverCapable, DiscoveryConfig, DiscoveryEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let radio = DeviceBuilder::new()
        .serial_port("/dev/ttyUSB0")
        .baud_rate(9_600)
        .open()
        .await?;

    let mut events = radio.subscribe_discovery();
    radio.start_discovery(DiscoveryConfig::default()).await?;
    println!("Scanning...\n");

    loop {
        match events.recv().await {
            Ok(DiscoveryEvent::DeviceDiscovered(node)) => {
                println!("found {} at {} ({:?})", node.node_id, node.addr64, node.device_type);
            }
            Ok(DiscoveryEvent::Finished { reason, devices }) => {
                println!("\nScan finished ({reason:?}), {} device(s):", devices.len());
                for node in devices {
                    println!("  {} {} {:?}", node.addr64, node.addr16, node.device_type);
                }
                break;
            }
            Err(e) => {
                eprintln!("discovery event stream ended: {e}");
                break;
            }
        }
    }

    radio.close().await?;
    Ok(())
}
