use crate::types::ZoneId;
use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Line terminator on the wire
pub const TERMINATOR: char = '\r';

/// Lines longer than this without a terminator are discarded
const MAX_LINE_LENGTH: usize = 1024;

/// Receiver inputs accepted by `SI` and zone input commands
pub const RECEIVER_INPUTS: &[&str] = &[
    "PHONO", "CD", "TUNER", "DVD", "BD", "TV", "SAT/CBL", "MPLAY", "GAME", "NET", "AUX1",
    "AUX2", "BT", "USB/IPOD", "HDRADIO", "8K",
];

/// Surround modes accepted by `MS`
pub const SURROUND_MODES: &[&str] = &[
    "MOVIE", "MUSIC", "GAME", "DIRECT", "PURE DIRECT", "STEREO", "AUTO", "DOLBY DIGITAL",
    "DTS SURROUND", "AURO3D", "MCH STEREO", "VIRTUAL", "NEURAL:X",
];

/// Tuner bands accepted by `TMAN`
pub const TUNER_BANDS: &[&str] = &["FM", "AM", "DAB"];

/// Highest settable master/zone volume
pub const MAX_VOLUME: f64 = 98.0;

/// Highest tuner preset number
pub const MAX_PRESET: u8 = 56;

/// Inbound message from the receiver
#[derive(Debug, Clone, PartialEq)]
pub enum AvrMessage {
    Power(bool),
    MainZonePower(bool),
    Volume(f64),
    MaxVolume(f64),
    Mute(bool),
    Source(String),
    SurroundMode(String),
    TunerFrequency(f64),
    TunerBand(String),
    /// `None` when no preset is selected (`TPANOFF`)
    TunerPreset(Option<u8>),
    StationName(String),
    Audyssey(bool),
    OutputRouting(String),
    Zone(ZoneId, ZoneEvent),
    /// Line that matched no known prefix
    Unknown(String),
}

/// Zone-scoped inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    Power(bool),
    Volume(f64),
    Mute(bool),
    Input(String),
}

#[derive(Debug, Clone, Copy)]
enum Field {
    StationName,
    MaxVolume,
    Audyssey,
    OutputRouting,
    Frequency,
    Band,
    Preset,
    Power,
    Volume,
    Mute,
    Source,
    SurroundMode,
}

/// Named prefixes, longest first
const NAMED_PREFIXES: &[(&str, Field)] = &[
    ("TFANNAME", Field::StationName),
    ("MVMAX", Field::MaxVolume),
    ("PSLFC", Field::Audyssey),
    ("OPTXM", Field::OutputRouting),
    ("TFAN", Field::Frequency),
    ("TMAN", Field::Band),
    ("TPAN", Field::Preset),
];

const GENERIC_PREFIXES: &[(&str, Field)] = &[
    ("PW", Field::Power),
    ("MV", Field::Volume),
    ("MU", Field::Mute),
    ("SI", Field::Source),
    ("MS", Field::SurroundMode),
];

/// Zone sub-commands that are recognized on the wire but not modelled
const IGNORED_ZONE_COMMANDS: &[&str] = &["CS", "CV", "SLP", "QUICK", "PS", "HPF", "STBY", "SMART"];

/// Main-zone replies that share a prefix with a modelled field but carry something else
///
/// `TMAN?` also reports the tuning mode, and `MS` carries quick/smart select slots.
const IGNORED_MAIN_COMMANDS: &[&str] = &["TMANAUTO", "TMANMANUAL", "MSQUICK", "MSSMART"];

/// Classify one line (without terminator)
///
/// Several prefixes are proper prefixes of others (`TFAN` / `TFANNAME`,
/// `MV` / `MVMAX`), so classification runs through tiers in a fixed order:
/// zone messages, long named prefixes (longest first), then the generic
/// two-character codes. Anything left over is [`AvrMessage::Unknown`].
pub fn parse_line(line: &str) -> AvrMessage {
    let line = line.trim_matches(|c| c == '\r' || c == '\n');

    if let Some(message) = parse_zone(line) {
        return message;
    }
    if IGNORED_MAIN_COMMANDS.iter().any(|c| line.starts_with(c)) {
        return unknown(line);
    }

    for (prefix, field) in NAMED_PREFIXES.iter().chain(GENERIC_PREFIXES) {
        if let Some(rest) = line.strip_prefix(prefix) {
            return parse_field(*field, rest.trim_start()).unwrap_or_else(|| unknown(line));
        }
    }

    unknown(line)
}

fn unknown(line: &str) -> AvrMessage {
    AvrMessage::Unknown(line.to_string())
}

fn parse_zone(line: &str) -> Option<AvrMessage> {
    if let Some(rest) = line.strip_prefix("ZM") {
        return parse_toggle(rest, "ON", "OFF").map(AvrMessage::MainZonePower);
    }

    let zone = line.get(..2).and_then(ZoneId::from_prefix)?;
    let rest = &line[2..];

    let event = if let Some(on) = parse_toggle(rest, "ON", "OFF") {
        Some(ZoneEvent::Power(on))
    } else if let Some(mute) = rest.strip_prefix("MU") {
        parse_toggle(mute, "ON", "OFF").map(ZoneEvent::Mute)
    } else if let Some(volume) = decode_volume(rest) {
        Some(ZoneEvent::Volume(volume))
    } else if rest.is_empty() || IGNORED_ZONE_COMMANDS.iter().any(|c| rest.starts_with(c)) {
        None
    } else {
        Some(ZoneEvent::Input(rest.to_string()))
    };

    Some(match event {
        Some(event) => AvrMessage::Zone(zone, event),
        None => unknown(line),
    })
}

fn parse_field(field: Field, value: &str) -> Option<AvrMessage> {
    let text = || {
        let value = value.trim_end();
        (!value.is_empty()).then(|| value.to_string())
    };

    match field {
        Field::StationName => text().map(AvrMessage::StationName),
        Field::MaxVolume => decode_volume(value).map(AvrMessage::MaxVolume),
        Field::Audyssey => parse_toggle(value, "ON", "OFF").map(AvrMessage::Audyssey),
        Field::OutputRouting => text().map(AvrMessage::OutputRouting),
        Field::Frequency => decode_frequency(value).map(AvrMessage::TunerFrequency),
        Field::Band => text().map(AvrMessage::TunerBand),
        Field::Preset => {
            if value == "OFF" {
                Some(AvrMessage::TunerPreset(None))
            } else {
                decode_preset(value).map(|p| AvrMessage::TunerPreset(Some(p)))
            }
        }
        Field::Power => parse_toggle(value, "ON", "STANDBY").map(AvrMessage::Power),
        Field::Volume => decode_volume(value).map(AvrMessage::Volume),
        Field::Mute => parse_toggle(value, "ON", "OFF").map(AvrMessage::Mute),
        Field::Source => text().map(AvrMessage::Source),
        Field::SurroundMode => text().map(AvrMessage::SurroundMode),
    }
}

fn parse_toggle(value: &str, on: &str, off: &str) -> Option<bool> {
    let value = value.trim();
    if value == on {
        Some(true)
    } else if value == off {
        Some(false)
    } else {
        None
    }
}

fn toggle(value: bool, on: &'static str, off: &'static str) -> &'static str {
    if value {
        on
    } else {
        off
    }
}

/// Encode a volume as two zero-padded digits, plus `5` for a half step
pub fn encode_volume(volume: f64) -> String {
    let whole = volume.floor();
    let mut encoded = format!("{:02}", whole as u32);
    if volume - whole != 0.0 {
        encoded.push('5');
    }
    encoded
}

/// Decode a volume: the first two digits are the integer part, any further
/// digits `d` add `d / 10^(len - 2)` where `len` is the full digit count.
pub fn decode_volume(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if value.len() <= 2 {
        return value.parse::<u32>().ok().map(f64::from);
    }

    let whole = f64::from(value[..2].parse::<u32>().ok()?);
    let extra = f64::from(value[2..].parse::<u32>().ok()?);
    Some(whole + extra / 10f64.powi(value.len() as i32 - 2))
}

/// Encode a tuner frequency as value x 100, six digits
pub fn encode_frequency(frequency: f64) -> String {
    format!("{:06}", (frequency * 100.0).round() as u64)
}

pub fn decode_frequency(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().map(|v| v as f64 / 100.0)
}

pub fn encode_preset(preset: u8) -> String {
    format!("{:02}", preset)
}

pub fn decode_preset(value: &str) -> Option<u8> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Menu keys of the receiver's remote control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Return,
    Option,
    Info,
    MenuOn,
    MenuOff,
}

impl RemoteKey {
    pub fn code(&self) -> &'static str {
        match self {
            RemoteKey::Up => "MNCUP",
            RemoteKey::Down => "MNCDN",
            RemoteKey::Left => "MNCLT",
            RemoteKey::Right => "MNCRT",
            RemoteKey::Enter => "MNENT",
            RemoteKey::Return => "MNRTN",
            RemoteKey::Option => "MNOPT",
            RemoteKey::Info => "MNINF",
            RemoteKey::MenuOn => "MNMEN ON",
            RemoteKey::MenuOff => "MNMEN OFF",
        }
    }
}

/// Outgoing receiver command
#[derive(Debug, Clone, PartialEq)]
pub enum AvrCommand {
    Power(bool),
    Volume(f64),
    VolumeUp,
    VolumeDown,
    Mute(bool),
    Source(String),
    SurroundMode(String),
    TunerFrequency(f64),
    TunerBand(String),
    TunerPreset(u8),
    Audyssey(bool),
    Zone(ZoneId, ZoneCommand),
    /// Status query for a prefix, e.g. `MV` -> `MV?`
    Query(String),
    RemoteKey(RemoteKey),
    /// Opaque token sent verbatim (infra-red macros and the like)
    Raw(String),
}

/// Zone-scoped outgoing command
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneCommand {
    Power(bool),
    Volume(f64),
    Mute(bool),
    Input(String),
}

impl AvrCommand {
    pub fn query(prefix: impl Into<String>) -> Self {
        AvrCommand::Query(prefix.into())
    }

    /// Wire form without the terminator
    pub fn encode(&self) -> String {
        match self {
            AvrCommand::Power(on) => format!("PW{}", toggle(*on, "ON", "STANDBY")),
            AvrCommand::Volume(v) => format!("MV{}", encode_volume(*v)),
            AvrCommand::VolumeUp => "MVUP".to_string(),
            AvrCommand::VolumeDown => "MVDOWN".to_string(),
            AvrCommand::Mute(on) => format!("MU{}", toggle(*on, "ON", "OFF")),
            AvrCommand::Source(s) => format!("SI{}", s),
            AvrCommand::SurroundMode(m) => format!("MS{}", m),
            AvrCommand::TunerFrequency(f) => format!("TFAN{}", encode_frequency(*f)),
            AvrCommand::TunerBand(b) => format!("TMAN{}", b),
            AvrCommand::TunerPreset(p) => format!("TPAN{}", encode_preset(*p)),
            AvrCommand::Audyssey(on) => format!("PSLFC {}", toggle(*on, "ON", "OFF")),
            AvrCommand::Zone(zone, cmd) => match cmd {
                ZoneCommand::Power(on) => format!("{}{}", zone, toggle(*on, "ON", "OFF")),
                ZoneCommand::Volume(v) => format!("{}{}", zone, encode_volume(*v)),
                ZoneCommand::Mute(on) => format!("{}MU{}", zone, toggle(*on, "ON", "OFF")),
                ZoneCommand::Input(i) => format!("{}{}", zone, i),
            },
            AvrCommand::Query(prefix) => format!("{}?", prefix),
            AvrCommand::RemoteKey(key) => key.code().to_string(),
            AvrCommand::Raw(token) => token.clone(),
        }
    }
}

/// Frames the receiver byte stream into lines. Partial lines stay buffered
/// until their terminator arrives.
#[derive(Debug, Default)]
pub struct AvrLineCodec;

impl Decoder for AvrLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            let Some(pos) = buf.iter().position(|b| *b == TERMINATOR as u8) else {
                if buf.len() > MAX_LINE_LENGTH {
                    tracing::warn!("Discarding {} bytes without line terminator", buf.len());
                    buf.clear();
                }
                return Ok(None);
            };

            let line = buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]);
            let text = text.trim_matches('\n');
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }
}

impl Encoder<String> for AvrLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> io::Result<()> {
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(TERMINATOR as u8);
        Ok(())
    }
}
