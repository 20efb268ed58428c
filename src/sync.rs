use crate::config::BridgeConfig;
use crate::line_codec::{AvrMessage, ZoneEvent};
use crate::property::{Property, PropertyCache, PropertyValue, ReplacementSet};
use crate::protocol::HeosFrame;
use crate::sources::SourceCatalog;
use crate::subscription::DeviceEvent;
use crate::types::{MediaKind, Pid, PlayOption, RepeatMode, ZoneId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Work the device must do after applying a frame
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FollowUp {
    RefreshNowPlaying,
    RefreshZone(ZoneId),
}

/// Outcome of applying one inbound frame
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// Properties whose cached value changed; `None` zone means the device itself
    pub changes: Vec<(Option<ZoneId>, Property, PropertyValue)>,
    pub events: Vec<DeviceEvent>,
    pub follow_ups: Vec<FollowUp>,
}

#[derive(Debug, Default)]
pub(crate) struct ZoneState {
    pub cache: PropertyCache,
    /// Set once the zone's refresh batch has been sent on this connection
    pub refreshed: bool,
}

/// Synchronized state of one canonical device
///
/// The receiver is authoritative for every property in the device's
/// [`ReplacementSet`]; streaming updates for those land on the `heos_*` shadow
/// instead. The tuner's RDS name only counts while the receiver is on the
/// tuner, and streaming station updates are suppressed while the receiver is
/// on anything other than the streaming input.
#[derive(Debug)]
pub(crate) struct DeviceState {
    pub pid: Pid,
    pub cache: PropertyCache,
    pub replacement: ReplacementSet,
    pub media_kind: Option<MediaKind>,
    pub options: Vec<PlayOption>,
    /// Last input reported by the receiver (`SI`)
    pub receiver_source: Option<String>,
    pub override_station: bool,
    pub streaming_refreshed: bool,
    pub receiver_refreshed: bool,
    pub zones: BTreeMap<ZoneId, ZoneState>,
    streaming_input: String,
    tuner_input: String,
}

impl DeviceState {
    pub fn new(pid: Pid, dual_protocol: bool, config: &BridgeConfig) -> Self {
        let (replacement, zones) = if dual_protocol {
            (
                ReplacementSet::receiver_owned(),
                config.zones.iter().map(|z| (*z, ZoneState::default())).collect(),
            )
        } else {
            (ReplacementSet::default(), BTreeMap::new())
        };

        Self {
            pid,
            cache: PropertyCache::default(),
            replacement,
            media_kind: None,
            options: Vec::new(),
            receiver_source: None,
            override_station: false,
            streaming_refreshed: false,
            receiver_refreshed: false,
            zones,
            streaming_input: config.streaming_input.clone(),
            tuner_input: config.tuner_input.clone(),
        }
    }

    /// Apply a HEOS response or event addressed to this device
    pub fn apply_heos_frame(&mut self, frame: &HeosFrame, catalog: &SourceCatalog) -> Effects {
        let mut fx = Effects::default();
        if frame.is_failure() || frame.is_under_process() {
            return fx;
        }
        let message = &frame.message;

        match (frame.group(), frame.command()) {
            ("event", "player_state_changed")
            | ("player", "get_play_state")
            | ("player", "set_play_state") => {
                if let Some(state) = message.get("state") {
                    self.apply_play_state(state, &mut fx);
                }
            }
            ("event", "player_volume_changed") => {
                if let Some(level) = message.get_f64("level") {
                    self.set_streaming(Property::Volume, level.into(), &mut fx);
                }
                if let Some(mute) = message.get("mute") {
                    self.set_streaming(Property::Muted, (mute == "on").into(), &mut fx);
                }
            }
            ("player", "get_volume") | ("player", "set_volume") => {
                if let Some(level) = message.get_f64("level") {
                    self.set_streaming(Property::Volume, level.into(), &mut fx);
                }
            }
            ("player", "get_mute") | ("player", "set_mute") => {
                if let Some(state) = message.get("state") {
                    self.set_streaming(Property::Muted, (state == "on").into(), &mut fx);
                }
            }
            ("event", "repeat_mode_changed")
            | ("event", "shuffle_mode_changed")
            | ("player", "get_play_mode")
            | ("player", "set_play_mode") => {
                match message.get("repeat").map(RepeatMode::parse) {
                    Some(Some(mode)) => self.set(Property::Repeat, mode.as_str().into(), &mut fx),
                    Some(None) => tracing::debug!("Player {}: unknown repeat mode in {:?}", self.pid, message),
                    None => {}
                }
                if let Some(shuffle) = message.get("shuffle") {
                    self.set(Property::Shuffle, (shuffle == "on").into(), &mut fx);
                }
            }
            ("event", "player_now_playing_changed") => {
                fx.follow_ups.push(FollowUp::RefreshNowPlaying);
            }
            ("player", "get_now_playing_media") => {
                self.apply_now_playing(frame, catalog, &mut fx);
            }
            ("event", "player_now_playing_progress") => {
                fx.events.push(DeviceEvent::PlaybackProgress {
                    position_ms: message.get_i64("cur_pos").unwrap_or(0),
                    duration_ms: message.get_i64("duration").unwrap_or(0),
                });
            }
            ("event", "player_playback_error") => {
                fx.events.push(DeviceEvent::PlaybackError {
                    message: message.get("error").unwrap_or("unknown error").to_string(),
                });
            }
            (group, command) => {
                tracing::trace!("pid {}: no mapping for {}/{}", self.pid, group, command);
            }
        }

        fx
    }

    /// Apply a message read off this device's receiver connection
    pub fn apply_avr_message(&mut self, message: &AvrMessage) -> Effects {
        let mut fx = Effects::default();

        match message {
            AvrMessage::Power(on) | AvrMessage::MainZonePower(on) => {
                self.set(Property::Power, (*on).into(), &mut fx)
            }
            AvrMessage::Volume(v) => self.set(Property::Volume, (*v).into(), &mut fx),
            AvrMessage::MaxVolume(v) => self.set(Property::MaxVolume, (*v).into(), &mut fx),
            AvrMessage::Mute(m) => self.set(Property::Muted, (*m).into(), &mut fx),
            AvrMessage::Source(source) => {
                self.override_station = *source != self.streaming_input;
                self.receiver_source = Some(source.clone());
                self.set(Property::Source, source.as_str().into(), &mut fx);
            }
            AvrMessage::SurroundMode(mode) => {
                self.set(Property::SurroundMode, mode.as_str().into(), &mut fx)
            }
            AvrMessage::TunerFrequency(f) => {
                self.set(Property::TunerFrequency, (*f).into(), &mut fx)
            }
            AvrMessage::TunerBand(band) => self.set(Property::TunerBand, band.as_str().into(), &mut fx),
            AvrMessage::TunerPreset(Some(preset)) => {
                self.set(Property::TunerPreset, f64::from(*preset).into(), &mut fx)
            }
            AvrMessage::TunerPreset(None) => {}
            AvrMessage::StationName(name) => {
                if self.receiver_source.as_deref() == Some(self.tuner_input.as_str()) {
                    self.set(Property::Station, name.as_str().into(), &mut fx);
                }
            }
            AvrMessage::Audyssey(on) => self.set(Property::Audyssey, (*on).into(), &mut fx),
            AvrMessage::OutputRouting(routing) => {
                self.set(Property::OutputRouting, routing.as_str().into(), &mut fx)
            }
            AvrMessage::Zone(zone, event) => self.apply_zone_event(*zone, event, &mut fx),
            AvrMessage::Unknown(line) => {
                tracing::debug!("pid {}: ignoring receiver line {}", self.pid, line);
            }
        }

        fx
    }

    /// Arm the streaming refresh batch; true if it has not run on this connection
    pub fn take_streaming_refresh(&mut self) -> bool {
        !std::mem::replace(&mut self.streaming_refreshed, true)
    }

    pub fn take_receiver_refresh(&mut self) -> bool {
        !std::mem::replace(&mut self.receiver_refreshed, true)
    }

    pub fn on_streaming_disconnected(&mut self) {
        self.streaming_refreshed = false;
    }

    pub fn on_receiver_disconnected(&mut self) {
        self.receiver_refreshed = false;
        for zone in self.zones.values_mut() {
            zone.refreshed = false;
        }
    }

    fn apply_play_state(&mut self, state: &str, fx: &mut Effects) {
        self.set(Property::Playing, (state == "play").into(), fx);
        if state == "stop" {
            self.media_kind = None;
            self.options.clear();
        }
    }

    fn apply_now_playing(&mut self, frame: &HeosFrame, catalog: &SourceCatalog, fx: &mut Effects) {
        let Some(media) = frame.payload.as_ref().filter(|p| p.is_object()) else {
            return;
        };
        let text = |key: &str| media.get(key).and_then(Value::as_str).unwrap_or("").to_string();

        self.media_kind = media.get("type").and_then(Value::as_str).and_then(MediaKind::parse);
        self.options = frame.options.as_ref().map(parse_options).unwrap_or_default();

        self.set(Property::Title, text("song").into(), fx);
        self.set(Property::Artist, text("artist").into(), fx);
        self.set(Property::Album, text("album").into(), fx);
        self.set(Property::ImageUrl, text("image_url").into(), fx);

        if self.override_station {
            tracing::debug!("pid {}: receiver input overrides streaming station", self.pid);
        } else {
            self.set(Property::Station, text("station").into(), fx);
        }

        if let Some(name) = media
            .get("sid")
            .and_then(Value::as_i64)
            .and_then(|sid| catalog.name(sid))
        {
            self.set_streaming(Property::Source, name.into(), fx);
        }
    }

    fn apply_zone_event(&mut self, zone: ZoneId, event: &ZoneEvent, fx: &mut Effects) {
        let Some(state) = self.zones.get_mut(&zone) else {
            tracing::trace!("pid {}: zone {} not exposed", self.pid, zone);
            return;
        };

        let (property, value) = match event {
            ZoneEvent::Power(on) => {
                if *on && !state.refreshed {
                    state.refreshed = true;
                    fx.follow_ups.push(FollowUp::RefreshZone(zone));
                }
                (Property::Power, PropertyValue::from(*on))
            }
            ZoneEvent::Volume(v) => (Property::Volume, PropertyValue::from(*v)),
            ZoneEvent::Mute(m) => (Property::Muted, PropertyValue::from(*m)),
            ZoneEvent::Input(input) => (Property::Input, PropertyValue::from(input.as_str())),
        };

        if state.cache.set(property, value.clone()) {
            fx.changes.push((Some(zone), property, value));
        }
    }

    /// Update from the streaming protocol, honouring the replacement set
    fn set_streaming(&mut self, property: Property, value: PropertyValue, fx: &mut Effects) {
        if !self.replacement.contains(property) {
            self.set(property, value, fx);
        } else if let Some(shadow) = property.shadow() {
            self.set(shadow, value, fx);
        }
    }

    fn set(&mut self, property: Property, value: PropertyValue, fx: &mut Effects) {
        if self.cache.set(property, value.clone()) {
            fx.changes.push((None, property, value));
        }
    }
}

/// Flatten `[{"play": [{"id": 19, "name": "..."}]}, ...]`
fn parse_options(options: &Value) -> Vec<PlayOption> {
    options
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .flat_map(|group| group.values())
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|option| serde_json::from_value(option.clone()).ok())
        .collect()
}
