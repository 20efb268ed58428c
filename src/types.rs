use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// HEOS player identifier
pub type Pid = i64;

/// HEOS music source identifier
pub type SourceId = i64;

/// Stable external identifier of a canonical device, derived from its pid
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn from_pid(pid: Pid) -> Self {
        Self(format!("heos-{}", pid))
    }

    /// Identifier of a zone sub-device of this device
    pub fn zone(&self, zone: ZoneId) -> Self {
        Self(format!("{}-{}", self.0, zone.as_str().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streaming player as reported by `player/get_players`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub pid: Pid,
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: Option<String>,
}

/// AVR receiver as reported by the discovery collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverRecord {
    /// Host or IP address of the receiver's control port
    pub address: String,
    pub serial: String,
    pub uuid: Uuid,
    pub friendly_name: String,
    pub model_name: String,
}

/// Secondary output zone of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ZoneId {
    #[serde(rename = "Z2")]
    Zone2,
    #[serde(rename = "Z3")]
    Zone3,
}

impl ZoneId {
    pub const ALL: [ZoneId; 2] = [ZoneId::Zone2, ZoneId::Zone3];

    /// Line protocol prefix of the zone
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneId::Zone2 => "Z2",
            ZoneId::Zone3 => "Z3",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|z| z.as_str() == prefix)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of what is currently playing. Session-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Song,
    Station,
}

impl MediaKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "song" => Some(MediaKind::Song),
            "station" => Some(MediaKind::Station),
            _ => None,
        }
    }
}

/// Playback option offered for the current media (e.g. "Add to HEOS Favorites")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayOption {
    pub id: i64,
    pub name: String,
}

/// Repeat mode of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Off,
    All,
    One,
}

impl RepeatMode {
    pub const NAMES: &'static [&'static str] = &["off", "on_all", "on_one"];

    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "on_all",
            RepeatMode::One => "on_one",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(RepeatMode::Off),
            "on_all" => Some(RepeatMode::All),
            "on_one" => Some(RepeatMode::One),
            _ => None,
        }
    }
}
