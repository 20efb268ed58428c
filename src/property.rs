use crate::error::{BridgeError, Result};
use crate::line_codec::{MAX_PRESET, MAX_VOLUME, RECEIVER_INPUTS, SURROUND_MODES, TUNER_BANDS};
use crate::types::{RepeatMode, ZoneId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

/// Externally visible property names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Property {
    Power,
    Playing,
    Volume,
    Muted,
    Source,
    Input,
    Station,
    Title,
    Artist,
    Album,
    ImageUrl,
    Repeat,
    Shuffle,
    SurroundMode,
    TunerFrequency,
    TunerBand,
    TunerPreset,
    Audyssey,
    OutputRouting,
    MaxVolume,
    /// Streaming-side volume when the receiver owns `volume`
    HeosVolume,
    /// Streaming-side mute when the receiver owns `muted`
    HeosMuted,
    /// Streaming-side source when the receiver owns `source`
    HeosSource,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Power => "power",
            Property::Playing => "playing",
            Property::Volume => "volume",
            Property::Muted => "muted",
            Property::Source => "source",
            Property::Input => "input",
            Property::Station => "station",
            Property::Title => "title",
            Property::Artist => "artist",
            Property::Album => "album",
            Property::ImageUrl => "image_url",
            Property::Repeat => "repeat",
            Property::Shuffle => "shuffle",
            Property::SurroundMode => "surround_mode",
            Property::TunerFrequency => "tuner_frequency",
            Property::TunerBand => "tuner_band",
            Property::TunerPreset => "tuner_preset",
            Property::Audyssey => "audyssey",
            Property::OutputRouting => "output_routing",
            Property::MaxVolume => "max_volume",
            Property::HeosVolume => "heos_volume",
            Property::HeosMuted => "heos_muted",
            Property::HeosSource => "heos_source",
        }
    }

    /// Streaming-protocol shadow of a property the receiver may own
    pub fn shadow(&self) -> Option<Property> {
        match self {
            Property::Volume => Some(Property::HeosVolume),
            Property::Muted => Some(Property::HeosMuted),
            Property::Source => Some(Property::HeosSource),
            _ => None,
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a property
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// Last known value of a property and when it was last reported
#[derive(Debug, Clone)]
struct CachedValue {
    value: PropertyValue,
    updated_at: Instant,
}

/// Per-device (or per-zone) property values
#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    values: BTreeMap<Property, CachedValue>,
}

impl PropertyCache {
    pub fn get(&self, property: Property) -> Option<&PropertyValue> {
        self.values.get(&property).map(|c| &c.value)
    }

    /// When the property was last reported, changed or not
    pub fn updated_at(&self, property: Property) -> Option<Instant> {
        self.values.get(&property).map(|c| c.updated_at)
    }

    /// Store a value; returns true when it differs from the cached one
    pub fn set(&mut self, property: Property, value: PropertyValue) -> bool {
        let changed = self.get(property) != Some(&value);
        self.values.insert(
            property,
            CachedValue {
                value,
                updated_at: Instant::now(),
            },
        );
        changed
    }

    pub fn snapshot(&self) -> BTreeMap<Property, PropertyValue> {
        self.values
            .iter()
            .map(|(k, v)| (*k, v.value.clone()))
            .collect()
    }
}

/// Property names whose authoritative source is the receiver protocol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacementSet(BTreeSet<Property>);

impl ReplacementSet {
    /// Properties a dual-protocol device takes from the receiver
    pub fn receiver_owned() -> Self {
        Self([Property::Volume, Property::Muted, Property::Source].into())
    }

    pub fn contains(&self, property: Property) -> bool {
        self.0.contains(&property)
    }
}

/// Validation capability of a property
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Bool,
    Number { min: f64, max: f64, step: f64 },
    Choice(&'static [&'static str]),
    Text,
}

impl ValueKind {
    fn check(&self, property: Property, value: &PropertyValue) -> Result<()> {
        let invalid = |reason: String| Err(BridgeError::Validation(format!("{}: {}", property, reason)));

        match (self, value) {
            (ValueKind::Bool, PropertyValue::Bool(_)) => Ok(()),
            (ValueKind::Number { min, max, step }, PropertyValue::Number(n)) => {
                if !n.is_finite() || *n < *min || *n > *max {
                    return invalid(format!("{} outside {}..={}", n, min, max));
                }
                let steps = (n - min) / step;
                if (steps - steps.round()).abs() > 1e-9 {
                    return invalid(format!("{} is not a multiple of {}", n, step));
                }
                Ok(())
            }
            (ValueKind::Choice(choices), PropertyValue::Text(s)) => {
                if choices.contains(&s.as_str()) {
                    Ok(())
                } else {
                    invalid(format!("unknown value {:?}", s))
                }
            }
            (ValueKind::Text, PropertyValue::Text(_)) => Ok(()),
            (kind, value) => invalid(format!("{:?} does not fit {:?}", value, kind)),
        }
    }
}

/// Which protocol a write is encoded for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Streaming,
    Receiver,
    ReceiverZone(ZoneId),
}

/// Description of one exposed property
///
/// `kind` validates values, `route` picks the protocol a write is encoded for,
/// and `field` is what the write actually targets. Shadow properties such as
/// `heos_volume` delegate their writes to the `volume` field on the streaming
/// route.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub property: Property,
    /// Field the write encodes; differs from `property` for shadows
    pub field: Property,
    pub kind: ValueKind,
    pub read_only: bool,
    pub route: Route,
}

impl PropertySpec {
    fn new(property: Property, kind: ValueKind, route: Route) -> Self {
        Self {
            property,
            field: property,
            kind,
            read_only: false,
            route,
        }
    }

    fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn delegate_to(mut self, field: Property) -> Self {
        self.field = field;
        self
    }

    /// Reject writes that are read-only, out of range or of the wrong type
    pub fn validate(&self, value: &PropertyValue) -> Result<()> {
        if self.read_only {
            return Err(BridgeError::Validation(format!("{} is read-only", self.property)));
        }
        self.kind.check(self.property, value)
    }
}

const STREAMING_VOLUME: ValueKind = ValueKind::Number {
    min: 0.0,
    max: 100.0,
    step: 1.0,
};

const RECEIVER_VOLUME: ValueKind = ValueKind::Number {
    min: 0.0,
    max: MAX_VOLUME,
    step: 0.5,
};

fn streaming_metadata() -> Vec<PropertySpec> {
    [
        Property::Station,
        Property::Title,
        Property::Artist,
        Property::Album,
        Property::ImageUrl,
    ]
    .into_iter()
    .map(|p| PropertySpec::new(p, ValueKind::Text, Route::Streaming).read_only())
    .chain([
        PropertySpec::new(Property::Playing, ValueKind::Bool, Route::Streaming),
        PropertySpec::new(Property::Repeat, ValueKind::Choice(RepeatMode::NAMES), Route::Streaming),
        PropertySpec::new(Property::Shuffle, ValueKind::Bool, Route::Streaming),
    ])
    .collect()
}

/// Schema of a device reachable only through the streaming protocol
pub fn single_protocol_schema() -> Vec<PropertySpec> {
    let mut specs = streaming_metadata();
    specs.extend([
        PropertySpec::new(Property::Volume, STREAMING_VOLUME, Route::Streaming),
        PropertySpec::new(Property::Muted, ValueKind::Bool, Route::Streaming),
        PropertySpec::new(Property::Source, ValueKind::Text, Route::Streaming).read_only(),
    ]);
    specs
}

/// Schema of a device that also has a receiver connection
pub fn dual_protocol_schema() -> Vec<PropertySpec> {
    let mut specs = streaming_metadata();
    specs.extend([
        PropertySpec::new(Property::Power, ValueKind::Bool, Route::Receiver),
        PropertySpec::new(Property::Volume, RECEIVER_VOLUME, Route::Receiver),
        PropertySpec::new(Property::Muted, ValueKind::Bool, Route::Receiver),
        PropertySpec::new(Property::Source, ValueKind::Choice(RECEIVER_INPUTS), Route::Receiver),
        PropertySpec::new(Property::SurroundMode, ValueKind::Choice(SURROUND_MODES), Route::Receiver),
        PropertySpec::new(
            Property::TunerFrequency,
            ValueKind::Number {
                min: 0.01,
                max: 9999.99,
                step: 0.01,
            },
            Route::Receiver,
        ),
        PropertySpec::new(Property::TunerBand, ValueKind::Choice(TUNER_BANDS), Route::Receiver),
        PropertySpec::new(
            Property::TunerPreset,
            ValueKind::Number {
                min: 1.0,
                max: f64::from(MAX_PRESET),
                step: 1.0,
            },
            Route::Receiver,
        ),
        PropertySpec::new(Property::Audyssey, ValueKind::Bool, Route::Receiver),
        PropertySpec::new(Property::OutputRouting, ValueKind::Text, Route::Receiver).read_only(),
        PropertySpec::new(Property::MaxVolume, RECEIVER_VOLUME, Route::Receiver).read_only(),
        PropertySpec::new(Property::HeosVolume, STREAMING_VOLUME, Route::Streaming)
            .delegate_to(Property::Volume),
        PropertySpec::new(Property::HeosMuted, ValueKind::Bool, Route::Streaming)
            .delegate_to(Property::Muted),
        PropertySpec::new(Property::HeosSource, ValueKind::Text, Route::Streaming).read_only(),
    ]);
    specs
}

/// Schema of a receiver zone
pub fn zone_schema(zone: ZoneId) -> Vec<PropertySpec> {
    let route = Route::ReceiverZone(zone);
    vec![
        PropertySpec::new(Property::Power, ValueKind::Bool, route),
        PropertySpec::new(Property::Input, ValueKind::Choice(RECEIVER_INPUTS), route),
        PropertySpec::new(Property::Volume, RECEIVER_VOLUME, route),
        PropertySpec::new(Property::Muted, ValueKind::Bool, route),
    ]
}
