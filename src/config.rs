use crate::error::Result;
use crate::types::ZoneId;
use serde::Deserialize;
use std::time::Duration;

/// Tunables for connections, discovery and device behaviour
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use heos_avr_bridge::BridgeConfig;
///
/// let config = BridgeConfig::from_json(r#"{ "request_timeout_secs": 3 }"#).unwrap();
/// assert_eq!(config.request_timeout().as_secs(), 3);
/// assert_eq!(config.heos_port, 1255);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// HEOS CLI port
    pub heos_port: u16,
    /// AVR control port
    pub avr_port: u16,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub reconnect_initial_secs: u64,
    pub reconnect_max_secs: u64,
    /// Interval between `system/heart_beat` requests; 0 disables them
    pub heartbeat_secs: u64,
    /// Minimum spacing between consecutive AVR commands
    pub avr_command_spacing_ms: u64,
    pub discovery_interval_secs: u64,
    /// Capacity of the broadcast channels carrying frames and updates
    pub channel_capacity: usize,
    /// Receiver input that plays the HEOS stream
    pub streaming_input: String,
    /// Receiver input of the built-in tuner
    pub tuner_input: String,
    /// Zones exposed as sub-devices of dual-protocol devices
    pub zones: Vec<ZoneId>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heos_port: 1255,
            avr_port: 23,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            reconnect_initial_secs: 1,
            reconnect_max_secs: 60,
            heartbeat_secs: 30,
            avr_command_spacing_ms: 50,
            discovery_interval_secs: 60,
            channel_capacity: 256,
            streaming_input: "NET".to_string(),
            tuner_input: "TUNER".to_string(),
            zones: vec![ZoneId::Zone2],
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_secs)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }

    pub fn avr_command_spacing(&self) -> Duration {
        Duration::from_millis(self.avr_command_spacing_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.avr_port, 23);
        assert_eq!(config.streaming_input, "NET");
        assert_eq!(config.zones, vec![ZoneId::Zone2]);
        assert_eq!(config.heartbeat(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = BridgeConfig::from_json(r#"{"zones": ["Z2", "Z3"], "heartbeat_secs": 0}"#).unwrap();
        assert_eq!(config.zones, vec![ZoneId::Zone2, ZoneId::Zone3]);
        assert_eq!(config.heartbeat(), None);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }
}
