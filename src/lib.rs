//! Rust library bridging HEOS streaming players and Denon/Marantz AVR control
//!
//! A networked receiver usually speaks two unrelated protocols: the HEOS CLI
//! (JSON responses and change events over one shared TCP connection per
//! system) and the AVR line protocol (carriage-return terminated ASCII
//! commands on the receiver's control port). This library merges both into
//! one property-based device model:
//!
//! - Request/response correlation over the shared HEOS connection
//! - Line codec for the AVR protocol, including its odd volume encoding
//! - Identity resolution joining players and receivers by serial number
//! - State synchronization with receiver-over-streaming precedence
//! - Zone sub-devices for the receiver's secondary outputs
//! - Automatic reconnection with exponential backoff
//!
//! # Quick Start
//!
//! ```no_run
//! use heos_avr_bridge::{Bridge, BridgeConfig, Property, ReceiverRecord};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bridge = Bridge::connect("192.168.1.50", BridgeConfig::default());
//!     bridge.heos().wait_connected(std::time::Duration::from_secs(5)).await?;
//!
//!     // Receivers normally come from an SSDP search
//!     let receivers: Vec<ReceiverRecord> = Vec::new();
//!     bridge.discover_once(&receivers).await?;
//!
//!     if let Some(device) = bridge.devices().first() {
//!         device.set_property(Property::Volume, 30.0).await?;
//!
//!         let mut updates = device.updates();
//!         while let Ok(update) = updates.recv().await {
//!             println!("Update: {:?}", update);
//!             break; // Just show one update
//!         }
//!     }
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Bridge**: device table, discovery passes and system events
//! - **Device / Zone**: property reads, validated writes and actions
//! - **Synchronizer**: maps inbound frames of both protocols onto property caches
//! - **HeosConnection**: shared HEOS socket, fan-out and request correlation
//! - **AvrConnection**: per-receiver line protocol socket
//! - **Protocol / line codec**: wire formats of the two protocols

mod avr_connection;
mod config;
mod connection;
mod coordinator;
mod device;
mod error;
mod identity;
mod line_codec;
mod link;
mod property;
mod protocol;
mod sources;
mod subscription;
mod sync;
mod types;
mod zone;

// Public exports
pub use avr_connection::AvrConnection;
pub use config::BridgeConfig;
pub use connection::HeosConnection;
pub use coordinator::{Bridge, ReceiverDiscovery};
pub use device::{Action, Device};
pub use error::{BridgeError, Result};
pub use identity::{resolve, serials_match, IdentityAction, KnownDevice};
pub use line_codec::{
    decode_frequency, decode_preset, decode_volume, encode_frequency, encode_preset,
    encode_volume, parse_line, AvrCommand, AvrLineCodec, AvrMessage, RemoteKey,
    ZoneCommand, ZoneEvent,
};
pub use link::LinkState;
pub use property::{
    dual_protocol_schema, single_protocol_schema, zone_schema, Property,
    PropertyCache, PropertySpec, PropertyValue, ReplacementSet, Route, ValueKind,
};
pub use protocol::{CommandKey, HeosCommand, HeosFrame, MessageFields};
pub use sources::{SharedSourceCatalog, SourceCatalog};
pub use subscription::{BridgeUpdate, DeviceEvent, DeviceUpdate, UpdateReceiver};
pub use types::{
    DeviceId, MediaKind, Pid, PlayOption, PlayerRecord, ReceiverRecord, RepeatMode, SourceId,
    ZoneId,
};
pub use zone::Zone;
