//! Watch a HEOS system and print every device and property change
//!
//! ```text
//! cargo run --example bridge -- <heos-host> [<receiver-address> <receiver-serial>]
//! ```
//!
//! Set `RUST_LOG=heos_avr_bridge=debug` to see protocol traffic.

use heos_avr_bridge::{Bridge, BridgeConfig, BridgeUpdate, Property, ReceiverRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("heos_avr_bridge=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().ok_or("usage: bridge <heos-host> [<receiver-address> <receiver-serial>]")?;

    // Without an SSDP collaborator, a receiver can be named on the command line
    let receivers: Vec<ReceiverRecord> = match (args.next(), args.next()) {
        (Some(address), Some(serial)) => vec![ReceiverRecord {
            address,
            serial,
            uuid: uuid::Uuid::nil(),
            friendly_name: "Receiver".to_string(),
            model_name: String::new(),
        }],
        _ => Vec::new(),
    };

    let mut bridge = Bridge::connect(host, BridgeConfig::default());
    let mut updates = bridge.subscribe_updates();
    bridge.start(Arc::new(receivers)).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update? {
                BridgeUpdate::DeviceAdded(id) => {
                    let Some(device) = bridge.device(&id) else {
                        // zones are reported after their parent
                        println!("+ zone {}", id);
                        continue;
                    };
                    println!(
                        "+ {} {} ({})",
                        id,
                        device.name(),
                        if device.is_dual_protocol() { "HEOS + AVR" } else { "HEOS" }
                    );

                    let mut device_updates = device.updates();
                    tokio::spawn(async move {
                        while let Ok(update) = device_updates.recv().await {
                            println!("  {:?}", update);
                        }
                    });
                }
                BridgeUpdate::DeviceRemoved(id) => println!("- {}", id),
                other => println!("  {:?}", other),
            },
            _ = tokio::time::sleep(Duration::from_secs(300)) => {
                println!("{} device(s)", bridge.device_count());
                for device in bridge.devices() {
                    let volume = device.get(Property::Volume);
                    match device.updated_at(Property::Volume) {
                        Some(at) => println!("  {} volume {:?}, reported {:?} ago", device.id(), volume, at.elapsed()),
                        None => println!("  {} volume not reported yet", device.id()),
                    }
                }
            }
        }
    }

    bridge.stop().await;
    Ok(())
}
