use crate::avr_connection::AvrConnection;
use crate::config::BridgeConfig;
use crate::connection::HeosConnection;
use crate::error::{BridgeError, Result};
use crate::identity::KnownDevice;
use crate::line_codec::{AvrCommand, AvrMessage, RemoteKey, ZoneCommand};
use crate::link::LinkState;
use crate::property::{
    dual_protocol_schema, single_protocol_schema, zone_schema, Property, PropertyCache, PropertySpec,
    PropertyValue, Route,
};
use crate::protocol::{HeosCommand, HeosFrame};
use crate::sources::SharedSourceCatalog;
use crate::subscription::{DeviceUpdate, UpdateReceiver};
use crate::sync::{DeviceState, Effects, FollowUp};
use crate::types::{DeviceId, MediaKind, Pid, PlayOption, PlayerRecord, ReceiverRecord, ZoneId};
use crate::zone::Zone;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Commands sent to the player when its HEOS connection comes up
const STREAMING_REFRESH: &[&str] = &[
    "get_play_state",
    "get_now_playing_media",
    "get_volume",
    "get_mute",
    "get_play_mode",
];

/// Status queries sent to the receiver when its connection comes up
const RECEIVER_REFRESH: &[&str] = &["PW", "MV", "MU", "SI", "MS", "TFAN", "TMAN", "TPAN", "PSLFC "];

/// Intents that are not property writes
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    /// Play a HEOS favourite by its 1-based position
    PlayPreset(u32),
    /// Press a menu key on the receiver's remote
    RemoteKey(RemoteKey),
    /// Send an opaque token (e.g. an infra-red macro) to the receiver verbatim
    Raw(String),
}

/// A write encoded for one of the two protocols
pub(crate) enum Write {
    Streaming(HeosCommand),
    Receiver(AvrCommand),
}

struct ReceiverLink {
    record: ReceiverRecord,
    connection: Arc<AvrConnection>,
    task: JoinHandle<()>,
}

pub(crate) struct DeviceInner {
    pub(crate) id: DeviceId,
    pid: Pid,
    dual_protocol: bool,
    player: Mutex<PlayerRecord>,
    receiver: Mutex<Option<ReceiverLink>>,
    heos: Arc<HeosConnection>,
    state: Mutex<DeviceState>,
    catalog: SharedSourceCatalog,
    schema: Vec<PropertySpec>,
    zone_schemas: BTreeMap<ZoneId, Vec<PropertySpec>>,
    updates_tx: broadcast::Sender<DeviceUpdate>,
    streaming_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

/// Canonical device: one HEOS player plus, optionally, the receiver it lives in
///
/// Values are kept in sync from both protocols in the background. Writes are
/// validated against the device's schema and sent over whichever protocol
/// owns the property.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device, opening a receiver connection if a receiver is given
    pub fn new(
        player: PlayerRecord,
        receiver: Option<ReceiverRecord>,
        heos: Arc<HeosConnection>,
        catalog: SharedSourceCatalog,
        config: &BridgeConfig,
    ) -> Self {
        let receiver = receiver.map(|record| {
            let connection = AvrConnection::open(record.address.clone(), config);
            (record, connection)
        });
        Self::with_connections(player, receiver, heos, catalog, config)
    }

    /// Create a device over existing connections
    pub fn with_connections(
        player: PlayerRecord,
        receiver: Option<(ReceiverRecord, AvrConnection)>,
        heos: Arc<HeosConnection>,
        catalog: SharedSourceCatalog,
        config: &BridgeConfig,
    ) -> Self {
        let pid = player.pid;
        let dual_protocol = receiver.is_some();
        let (updates_tx, _) = broadcast::channel(config.channel_capacity);

        let (schema, zone_schemas) = if dual_protocol {
            (
                dual_protocol_schema(),
                config.zones.iter().map(|z| (*z, zone_schema(*z))).collect(),
            )
        } else {
            (single_protocol_schema(), BTreeMap::new())
        };

        tracing::info!(
            "Creating {} device {} for {} ({})",
            if dual_protocol { "dual-protocol" } else { "single-protocol" },
            DeviceId::from_pid(pid),
            player.name,
            player.model
        );

        let inner = Arc::new(DeviceInner {
            id: DeviceId::from_pid(pid),
            pid,
            dual_protocol,
            player: Mutex::new(player),
            receiver: Mutex::new(None),
            state: Mutex::new(DeviceState::new(pid, dual_protocol, config)),
            heos,
            catalog,
            schema,
            zone_schemas,
            updates_tx,
            streaming_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let frames = inner.heos.subscribe();
        let link = inner.heos.watch_state();
        let task = tokio::spawn(run_streaming(inner.clone(), frames, link));
        *lock(&inner.streaming_task) = Some(task);

        if let Some((record, connection)) = receiver {
            inner.attach_receiver(record, connection);
        }

        Self { inner }
    }

    /// External identifier, derived from the pid
    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    pub fn name(&self) -> String {
        lock(&self.inner.player).name.clone()
    }

    pub fn player(&self) -> PlayerRecord {
        lock(&self.inner.player).clone()
    }

    pub fn receiver(&self) -> Option<ReceiverRecord> {
        lock(&self.inner.receiver).as_ref().map(|r| r.record.clone())
    }

    pub fn is_dual_protocol(&self) -> bool {
        self.inner.dual_protocol
    }

    /// Properties this device exposes
    pub fn schema(&self) -> &[PropertySpec] {
        &self.inner.schema
    }

    /// Last known value of a property
    pub fn get(&self, property: Property) -> Option<PropertyValue> {
        lock(&self.inner.state).cache.get(property).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<Property, PropertyValue> {
        lock(&self.inner.state).cache.snapshot()
    }

    /// When either protocol last reported the property, even with an unchanged value
    pub fn updated_at(&self, property: Property) -> Option<Instant> {
        lock(&self.inner.state).cache.updated_at(property)
    }

    /// Whether the current media is a song or a station; cleared on stop
    pub fn media_kind(&self) -> Option<MediaKind> {
        lock(&self.inner.state).media_kind
    }

    /// Options the player offers for the current media
    pub fn play_options(&self) -> Vec<PlayOption> {
        lock(&self.inner.state).options.clone()
    }

    pub fn streaming_state(&self) -> LinkState {
        self.inner.heos.state()
    }

    pub fn receiver_state(&self) -> Option<LinkState> {
        lock(&self.inner.receiver).as_ref().map(|r| r.connection.state())
    }

    /// Subscribe to property changes and playback events of this device and its zones
    pub fn updates(&self) -> UpdateReceiver<DeviceUpdate> {
        self.inner.subscribe()
    }

    /// Write a property
    ///
    /// Writing the cached value is a no-op. Invalid values are rejected
    /// before anything is sent.
    ///
    /// ```no_run
    /// # use heos_avr_bridge::{Device, Property};
    /// # async fn example(device: Device) -> heos_avr_bridge::Result<()> {
    /// device.set_property(Property::Volume, 45.5).await?;
    /// device.set_property(Property::Muted, false).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_property(&self, property: Property, value: impl Into<PropertyValue>) -> Result<()> {
        self.inner.write(None, property, value.into()).await
    }

    /// Perform a playback or remote-control action
    pub async fn invoke(&self, action: Action) -> Result<()> {
        self.inner.ensure_alive()?;
        let pid = self.inner.pid;
        let player = |command: &str| HeosCommand::new("player", command).for_player(pid);

        let write = match action {
            Action::Play => Write::Streaming(player("set_play_state").param("state", "play")),
            Action::Pause => Write::Streaming(player("set_play_state").param("state", "pause")),
            Action::Stop => Write::Streaming(player("set_play_state").param("state", "stop")),
            Action::Next => Write::Streaming(player("play_next")),
            Action::Previous => Write::Streaming(player("play_previous")),
            Action::VolumeUp if self.inner.dual_protocol => Write::Receiver(AvrCommand::VolumeUp),
            Action::VolumeDown if self.inner.dual_protocol => Write::Receiver(AvrCommand::VolumeDown),
            Action::VolumeUp => Write::Streaming(player("volume_up")),
            Action::VolumeDown => Write::Streaming(player("volume_down")),
            Action::PlayPreset(0) => {
                return Err(BridgeError::Validation("presets are numbered from 1".to_string()))
            }
            Action::PlayPreset(preset) => Write::Streaming(
                HeosCommand::new("browse", "play_preset")
                    .for_player(pid)
                    .param("preset", preset),
            ),
            Action::RemoteKey(key) => Write::Receiver(AvrCommand::RemoteKey(key)),
            Action::Raw(token) => Write::Receiver(AvrCommand::Raw(token)),
        };

        self.inner.dispatch(write).await
    }

    /// Zone sub-device, present only on dual-protocol devices
    pub fn zone(&self, zone: ZoneId) -> Option<Zone> {
        self.inner
            .zone_schemas
            .contains_key(&zone)
            .then(|| Zone::new(self.inner.clone(), zone))
    }

    pub fn zones(&self) -> Vec<Zone> {
        self.inner
            .zone_schemas
            .keys()
            .map(|z| Zone::new(self.inner.clone(), *z))
            .collect()
    }

    /// Stop background tasks and close the receiver connection
    ///
    /// The device and its zones reject commands afterwards.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for zone in self.inner.zone_schemas.keys() {
            tracing::debug!("Destroying zone {}", self.inner.id.zone(*zone));
        }
        if let Some(task) = lock(&self.inner.streaming_task).take() {
            task.abort();
        }
        if let Some(receiver) = lock(&self.inner.receiver).take() {
            receiver.task.abort();
            receiver.connection.close();
        }
        tracing::info!("Destroyed device {}", self.inner.id);
    }

    pub(crate) fn known(&self) -> KnownDevice {
        KnownDevice {
            dual_protocol: self.inner.dual_protocol,
            receiver_address: lock(&self.inner.receiver)
                .as_ref()
                .map(|r| r.record.address.clone()),
        }
    }

    pub(crate) fn refresh_player(&self, player: PlayerRecord) {
        *lock(&self.inner.player) = player;
    }

    /// Store a new receiver record for the same address
    pub(crate) fn refresh_receiver(&self, record: ReceiverRecord) {
        if let Some(receiver) = lock(&self.inner.receiver).as_mut() {
            receiver.record = record;
        }
    }

    /// Swap the receiver connection; the streaming side is left alone
    pub(crate) fn replace_receiver(&self, record: ReceiverRecord, connection: AvrConnection) {
        tracing::info!(
            "Receiver of {} moved to {}, replacing its connection",
            self.inner.id,
            record.address
        );
        self.inner.attach_receiver(record, connection);
    }
}

impl DeviceInner {
    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(BridgeError::DeviceNotFound(self.id.to_string()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe(&self) -> UpdateReceiver<DeviceUpdate> {
        UpdateReceiver::new(self.updates_tx.subscribe())
    }

    pub(crate) fn zone_schema(&self, zone: ZoneId) -> &[PropertySpec] {
        self.zone_schemas.get(&zone).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn zone_value(&self, zone: ZoneId, property: Property) -> Option<PropertyValue> {
        let state = lock(&self.state);
        state.zones.get(&zone)?.cache.get(property).cloned()
    }

    pub(crate) fn zone_updated_at(&self, zone: ZoneId, property: Property) -> Option<Instant> {
        let state = lock(&self.state);
        state.zones.get(&zone)?.cache.updated_at(property)
    }

    pub(crate) fn zone_snapshot(&self, zone: ZoneId) -> BTreeMap<Property, PropertyValue> {
        let state = lock(&self.state);
        state
            .zones
            .get(&zone)
            .map(|z| z.cache.snapshot())
            .unwrap_or_default()
    }

    /// Write a property of the device, or of one of its zones
    pub(crate) async fn write(&self, zone: Option<ZoneId>, property: Property, value: PropertyValue) -> Result<()> {
        self.ensure_alive()?;
        let (schema, target) = match zone {
            Some(z) => (self.zone_schema(z), self.id.zone(z)),
            None => (self.schema.as_slice(), self.id.clone()),
        };
        let spec = schema
            .iter()
            .find(|s| s.property == property)
            .ok_or_else(|| BridgeError::Validation(format!("{} has no property {}", target, property)))?;

        let write = {
            let state = lock(&self.state);
            let cache = match zone {
                Some(z) => state.zones.get(&z).map(|z| &z.cache),
                None => Some(&state.cache),
            };
            if cache.and_then(|c| c.get(property)) == Some(&value) {
                tracing::debug!("{}: {} is already {:?}", target, property, value);
                return Ok(());
            }
            spec.validate(&value)?;

            match spec.route {
                Route::Streaming => Write::Streaming(streaming_write(self.pid, spec.field, &value, &state.cache)?),
                Route::Receiver => Write::Receiver(receiver_write(spec.field, &value)?),
                Route::ReceiverZone(z) => Write::Receiver(zone_write(z, spec.field, &value)?),
            }
        };

        tracing::debug!("{}: setting {} to {:?}", target, property, value);
        self.dispatch(write).await
    }

    pub(crate) async fn dispatch(&self, write: Write) -> Result<()> {
        match write {
            Write::Streaming(command) => self.heos.request(command).await.map(|_| ()),
            Write::Receiver(command) => self.receiver_connection()?.send(&command).await,
        }
    }

    fn receiver_connection(&self) -> Result<Arc<AvrConnection>> {
        lock(&self.receiver)
            .as_ref()
            .map(|r| r.connection.clone())
            .ok_or_else(|| BridgeError::Validation(format!("{} has no receiver", self.id)))
    }

    fn attach_receiver(self: &Arc<Self>, record: ReceiverRecord, connection: AvrConnection) {
        if let Some(previous) = lock(&self.receiver).take() {
            previous.task.abort();
            previous.connection.close();
        }
        lock(&self.state).on_receiver_disconnected();

        let connection = Arc::new(connection);
        let messages = connection.subscribe();
        let link = connection.watch_state();
        let task = tokio::spawn(run_receiver(self.clone(), connection.clone(), messages, link));

        *lock(&self.receiver) = Some(ReceiverLink {
            record,
            connection,
            task,
        });
    }

    fn apply_heos_frame(self: &Arc<Self>, frame: &HeosFrame) {
        let effects = {
            let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
            lock(&self.state).apply_heos_frame(frame, &catalog)
        };
        self.publish(effects);
    }

    fn apply_avr_message(self: &Arc<Self>, message: &AvrMessage) {
        let effects = lock(&self.state).apply_avr_message(message);
        self.publish(effects);
    }

    fn publish(self: &Arc<Self>, effects: Effects) {
        for (zone, property, value) in effects.changes {
            let device_id = match zone {
                Some(z) => self.id.zone(z),
                None => self.id.clone(),
            };
            tracing::debug!("{}: {} changed to {:?}", device_id, property, value);
            let _ = self.updates_tx.send(DeviceUpdate::PropertyChanged {
                device_id,
                property,
                value,
            });
        }

        for event in effects.events {
            let _ = self.updates_tx.send(DeviceUpdate::Event {
                device_id: self.id.clone(),
                event,
            });
        }

        for follow_up in effects.follow_ups {
            self.follow_up(follow_up);
        }
    }

    fn follow_up(self: &Arc<Self>, follow_up: FollowUp) {
        match follow_up {
            FollowUp::RefreshNowPlaying => {
                let inner = self.clone();
                tokio::spawn(async move {
                    let command = HeosCommand::new("player", "get_now_playing_media").for_player(inner.pid);
                    if let Err(e) = inner.heos.request(command).await {
                        tracing::warn!("{}: failed to refresh now playing: {}", inner.id, e);
                    }
                });
            }
            FollowUp::RefreshZone(zone) => {
                let Ok(connection) = self.receiver_connection() else {
                    return;
                };
                let id = self.id.zone(zone);
                tokio::spawn(async move {
                    let queries = [
                        AvrCommand::query(zone.as_str()),
                        AvrCommand::query(format!("{}MU", zone)),
                    ];
                    if let Err(e) = connection.send_all(&queries).await {
                        tracing::warn!("{}: failed to refresh zone: {}", id, e);
                    }
                });
            }
        }
    }

    fn on_streaming_state(self: &Arc<Self>, state: LinkState) {
        match state {
            LinkState::Connected => {
                if !lock(&self.state).take_streaming_refresh() {
                    return;
                }
                let inner = self.clone();
                tokio::spawn(async move {
                    tracing::debug!("{}: refreshing player state", inner.id);
                    for command in STREAMING_REFRESH {
                        let request = HeosCommand::new("player", *command).for_player(inner.pid);
                        match inner.heos.request(request).await {
                            Ok(_) => {}
                            Err(e @ (BridgeError::NotConnected | BridgeError::ConnectionClosed)) => {
                                tracing::debug!("{}: refresh interrupted: {}", inner.id, e);
                                break;
                            }
                            Err(e) => tracing::warn!("{}: {} failed: {}", inner.id, command, e),
                        }
                    }
                });
            }
            LinkState::Disconnected => {
                lock(&self.state).on_streaming_disconnected();
            }
            LinkState::Connecting | LinkState::Resubscribing => {}
        }
    }

    async fn on_receiver_state(self: &Arc<Self>, connection: &AvrConnection, state: LinkState) {
        match state {
            LinkState::Connected => {
                if !lock(&self.state).take_receiver_refresh() {
                    return;
                }
                tracing::debug!("{}: refreshing receiver state", self.id);
                let queries: Vec<AvrCommand> = RECEIVER_REFRESH
                    .iter()
                    .copied()
                    .chain(self.zone_schemas.keys().map(|z| z.as_str()))
                    .map(AvrCommand::query)
                    .collect();
                if let Err(e) = connection.send_all(&queries).await {
                    tracing::warn!("{}: failed to refresh receiver: {}", self.id, e);
                }
            }
            LinkState::Disconnected => {
                lock(&self.state).on_receiver_disconnected();
            }
            LinkState::Connecting | LinkState::Resubscribing => {}
        }
    }
}

/// Follow the shared HEOS connection, keeping frames addressed to this player
async fn run_streaming(
    inner: Arc<DeviceInner>,
    mut frames: broadcast::Receiver<HeosFrame>,
    mut link: watch::Receiver<LinkState>,
) {
    let state = *link.borrow_and_update();
    inner.on_streaming_state(state);

    loop {
        tokio::select! {
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                inner.on_streaming_state(state);
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if frame.pid() == Some(inner.pid) {
                        inner.apply_heos_frame(&frame);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("{}: missed {} HEOS frames", inner.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    tracing::debug!("{}: streaming task stopped", inner.id);
}

/// Follow this device's own receiver connection
async fn run_receiver(
    inner: Arc<DeviceInner>,
    connection: Arc<AvrConnection>,
    mut messages: broadcast::Receiver<AvrMessage>,
    mut link: watch::Receiver<LinkState>,
) {
    let state = *link.borrow_and_update();
    inner.on_receiver_state(&connection, state).await;

    loop {
        tokio::select! {
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                inner.on_receiver_state(&connection, state).await;
            }
            message = messages.recv() => match message {
                Ok(message) => inner.apply_avr_message(&message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("{}: missed {} receiver messages", inner.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    tracing::debug!("{}: receiver task for {} stopped", inner.id, connection.address());
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn bool_value(field: Property, value: &PropertyValue) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| BridgeError::Validation(format!("{}: expected a boolean", field)))
}

fn number_value(field: Property, value: &PropertyValue) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| BridgeError::Validation(format!("{}: expected a number", field)))
}

fn text_value(field: Property, value: &PropertyValue) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Validation(format!("{}: expected text", field)))
}

fn not_writable(field: Property) -> BridgeError {
    BridgeError::Validation(format!("{} cannot be written", field))
}

/// Encode a streaming write; play mode needs the other cached half
fn streaming_write(pid: Pid, field: Property, value: &PropertyValue, cache: &PropertyCache) -> Result<HeosCommand> {
    let player = |command: &str| HeosCommand::new("player", command).for_player(pid);

    match field {
        Property::Playing => {
            let state = if bool_value(field, value)? { "play" } else { "pause" };
            Ok(player("set_play_state").param("state", state))
        }
        Property::Volume => Ok(player("set_volume").param("level", number_value(field, value)?.round() as i64)),
        Property::Muted => Ok(player("set_mute").param("state", on_off(bool_value(field, value)?))),
        Property::Repeat => {
            let shuffle = cache
                .get(Property::Shuffle)
                .and_then(PropertyValue::as_bool)
                .unwrap_or(false);
            Ok(player("set_play_mode")
                .param("repeat", text_value(field, value)?)
                .param("shuffle", on_off(shuffle)))
        }
        Property::Shuffle => {
            let repeat = cache
                .get(Property::Repeat)
                .and_then(PropertyValue::as_str)
                .unwrap_or("off");
            Ok(player("set_play_mode")
                .param("repeat", repeat)
                .param("shuffle", on_off(bool_value(field, value)?)))
        }
        other => Err(not_writable(other)),
    }
}

fn receiver_write(field: Property, value: &PropertyValue) -> Result<AvrCommand> {
    match field {
        Property::Power => Ok(AvrCommand::Power(bool_value(field, value)?)),
        Property::Volume => Ok(AvrCommand::Volume(number_value(field, value)?)),
        Property::Muted => Ok(AvrCommand::Mute(bool_value(field, value)?)),
        Property::Source => Ok(AvrCommand::Source(text_value(field, value)?)),
        Property::SurroundMode => Ok(AvrCommand::SurroundMode(text_value(field, value)?)),
        Property::TunerFrequency => Ok(AvrCommand::TunerFrequency(number_value(field, value)?)),
        Property::TunerBand => Ok(AvrCommand::TunerBand(text_value(field, value)?)),
        Property::TunerPreset => Ok(AvrCommand::TunerPreset(number_value(field, value)? as u8)),
        Property::Audyssey => Ok(AvrCommand::Audyssey(bool_value(field, value)?)),
        other => Err(not_writable(other)),
    }
}

fn zone_write(zone: ZoneId, field: Property, value: &PropertyValue) -> Result<AvrCommand> {
    let command = match field {
        Property::Power => ZoneCommand::Power(bool_value(field, value)?),
        Property::Input => ZoneCommand::Input(text_value(field, value)?),
        Property::Volume => ZoneCommand::Volume(number_value(field, value)?),
        Property::Muted => ZoneCommand::Mute(bool_value(field, value)?),
        other => return Err(not_writable(other)),
    };
    Ok(AvrCommand::Zone(zone, command))
}
