use crate::avr_connection::AvrConnection;
use crate::config::BridgeConfig;
use crate::connection::HeosConnection;
use crate::device::{lock, Device};
use crate::error::{BridgeError, Result};
use crate::identity::{self, IdentityAction};
use crate::link::{Backoff, LinkState};
use crate::protocol::{HeosCommand, HeosFrame};
use crate::sources::{SharedSourceCatalog, SourceCatalog};
use crate::subscription::{BridgeUpdate, UpdateReceiver};
use crate::types::{DeviceId, Pid, PlayerRecord, ReceiverRecord};
use crate::zone::Zone;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Source of receiver records, e.g. an SSDP search plus description fetch
#[async_trait]
pub trait ReceiverDiscovery: Send + Sync {
    /// Receivers currently visible on the network
    async fn discover_receivers(&self) -> Result<Vec<ReceiverRecord>>;
}

/// A fixed list of receivers
#[async_trait]
impl ReceiverDiscovery for Vec<ReceiverRecord> {
    async fn discover_receivers(&self) -> Result<Vec<ReceiverRecord>> {
        Ok(self.clone())
    }
}

struct BridgeInner {
    heos: Arc<HeosConnection>,
    devices: Mutex<BTreeMap<Pid, Device>>,
    catalog: SharedSourceCatalog,
    updates_tx: broadcast::Sender<BridgeUpdate>,
    /// Signalled when the player list should be re-read without waiting
    pass_requested: Notify,
    config: BridgeConfig,
}

/// Top-level coordinator owning the device table
///
/// Keeps one HEOS connection for the whole system, merges players reported
/// over it with receivers from a [`ReceiverDiscovery`] and maintains one
/// [`Device`] per player.
///
/// # Example
///
/// ```no_run
/// use heos_avr_bridge::{Bridge, BridgeConfig, ReceiverRecord};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut bridge = Bridge::connect("192.168.1.50", BridgeConfig::default());
///     let receivers: Vec<ReceiverRecord> = Vec::new();
///     bridge.start(Arc::new(receivers)).await?;
///
///     tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
///     for device in bridge.devices() {
///         println!("{} ({})", device.name(), device.id());
///     }
///
///     bridge.stop().await;
///     Ok(())
/// }
/// ```
pub struct Bridge {
    inner: Arc<BridgeInner>,
    system_task: JoinHandle<()>,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Bridge over an existing HEOS connection
    pub fn new(heos: HeosConnection, config: BridgeConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(config.channel_capacity);
        let inner = Arc::new(BridgeInner {
            heos: Arc::new(heos),
            devices: Mutex::new(BTreeMap::new()),
            catalog: Arc::new(RwLock::new(SourceCatalog::default())),
            updates_tx,
            pass_requested: Notify::new(),
            config,
        });

        let frames = inner.heos.subscribe();
        let link = inner.heos.watch_state();
        let system_task = tokio::spawn(run_system(inner.clone(), frames, link));

        Self {
            inner,
            system_task,
            stop_tx: None,
            task_handle: None,
        }
    }

    /// Open a HEOS connection to `host` and bridge over it
    pub fn connect(host: impl Into<String>, config: BridgeConfig) -> Self {
        let heos = HeosConnection::open(host, &config);
        Self::new(heos, config)
    }

    pub fn heos(&self) -> &HeosConnection {
        &self.inner.heos
    }

    /// Subscribe to device table changes
    pub fn subscribe_updates(&self) -> UpdateReceiver<BridgeUpdate> {
        UpdateReceiver::new(self.inner.updates_tx.subscribe())
    }

    /// Snapshot of the current devices, in pid order
    pub fn devices(&self) -> Vec<Device> {
        lock(&self.inner.devices).values().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        lock(&self.inner.devices).len()
    }

    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        lock(&self.inner.devices).values().find(|d| d.id() == id).cloned()
    }

    pub fn device_by_pid(&self, pid: Pid) -> Option<Device> {
        lock(&self.inner.devices).get(&pid).cloned()
    }

    /// Look up a zone by its external id
    pub fn zone(&self, id: &DeviceId) -> Option<Zone> {
        lock(&self.inner.devices)
            .values()
            .flat_map(|d| d.zones())
            .find(|z| z.id() == id)
    }

    /// Current music source catalog
    pub fn sources(&self) -> SourceCatalog {
        self.inner
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the system for its players (`player/get_players`)
    pub async fn fetch_players(&self) -> Result<Vec<PlayerRecord>> {
        self.inner.fetch_players().await
    }

    /// Rebuild the music source catalog (`browse/get_music_sources`)
    pub async fn refresh_sources(&self) -> Result<()> {
        self.inner.refresh_sources().await
    }

    /// Reconcile the device table with one discovery pass
    pub fn apply_discovery(&self, players: &[PlayerRecord], receivers: &[ReceiverRecord]) {
        self.inner.apply_discovery(players, receivers);
    }

    /// Run a single discovery pass
    pub async fn discover_once(&self, discovery: &dyn ReceiverDiscovery) -> Result<()> {
        self.inner.discover_once(discovery).await
    }

    /// Start periodic discovery
    ///
    /// Passes run every discovery interval, right after the HEOS connection
    /// comes up and whenever the system reports a changed player list. Failed
    /// passes are retried with exponential backoff. A running discovery is
    /// restarted.
    pub async fn start(&mut self, discovery: Arc<dyn ReceiverDiscovery>) -> Result<()> {
        self.stop().await;

        let (stop_tx, _) = broadcast::channel(1);
        self.stop_tx = Some(stop_tx.clone());

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(inner.config.reconnect_initial(), inner.config.reconnect_max());
            let mut stop_rx = stop_tx.subscribe();

            loop {
                let delay = match inner.discover_once(discovery.as_ref()).await {
                    Ok(()) => {
                        backoff.reset();
                        inner.config.discovery_interval()
                    }
                    Err(e) => {
                        tracing::error!("Discovery pass failed: {}", e);
                        backoff.fail();
                        backoff.current()
                    }
                };

                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Discovery stopped");
                        break;
                    }
                    _ = inner.pass_requested.notified() => {
                        tracing::debug!("Discovery pass requested");
                    }
                    _ = sleep(delay) => {}
                }
            }
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop periodic discovery; known devices stay up
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_millis(500), handle).await.is_err() {
                abort.abort();
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        self.system_task.abort();
        for device in lock(&self.inner.devices).values() {
            device.destroy();
        }
    }
}

impl BridgeInner {
    async fn fetch_players(&self) -> Result<Vec<PlayerRecord>> {
        let frame = self.heos.request(HeosCommand::new("player", "get_players")).await?;
        let payload = frame
            .payload
            .ok_or_else(|| BridgeError::InvalidResponse("get_players returned no payload".to_string()))?;
        Ok(serde_json::from_value(payload)?)
    }

    async fn refresh_sources(&self) -> Result<()> {
        let frame = self
            .heos
            .request(HeosCommand::new("browse", "get_music_sources"))
            .await?;
        let payload = frame.payload.as_ref().ok_or_else(|| {
            BridgeError::InvalidResponse("get_music_sources returned no payload".to_string())
        })?;
        let catalog = SourceCatalog::from_payload(payload)?;
        tracing::info!("Loaded {} music sources", catalog.len());

        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
        let _ = self.updates_tx.send(BridgeUpdate::SourcesChanged);
        Ok(())
    }

    fn spawn_source_refresh(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.refresh_sources().await {
                tracing::warn!("Failed to refresh music sources: {}", e);
            }
        });
    }

    async fn discover_once(&self, discovery: &dyn ReceiverDiscovery) -> Result<()> {
        let players = self.fetch_players().await?;
        let receivers = discovery.discover_receivers().await?;
        tracing::debug!(
            "Discovery pass found {} player(s) and {} receiver(s)",
            players.len(),
            receivers.len()
        );
        self.apply_discovery(&players, &receivers);
        Ok(())
    }

    fn apply_discovery(&self, players: &[PlayerRecord], receivers: &[ReceiverRecord]) {
        let mut updates = Vec::new();
        {
            let mut devices = lock(&self.devices);
            let known: BTreeMap<_, _> = devices.iter().map(|(pid, d)| (*pid, d.known())).collect();

            for action in identity::resolve(&known, players, receivers) {
                match action {
                    IdentityAction::Create { player, receiver } => {
                        let device = self.create_device(player, receiver);
                        updates.extend(added(&device));
                        devices.insert(device.pid(), device);
                    }
                    IdentityAction::RefreshPlayer { player } => {
                        if let Some(device) = devices.get(&player.pid) {
                            device.refresh_player(player);
                        }
                    }
                    IdentityAction::Upgrade { player, receiver } => {
                        let pid = player.pid;
                        tracing::info!(
                            "Player {} matched receiver {} at {}",
                            pid,
                            receiver.friendly_name,
                            receiver.address
                        );
                        if let Some(old) = devices.remove(&pid) {
                            updates.extend(removed(&old));
                            old.destroy();
                        }
                        let device = self.create_device(player, Some(receiver));
                        updates.extend(added(&device));
                        updates.push(BridgeUpdate::DeviceUpgraded(device.id().clone()));
                        devices.insert(pid, device);
                    }
                    IdentityAction::RefreshReceiver {
                        player,
                        receiver,
                        address_changed,
                    } => {
                        let Some(device) = devices.get(&player.pid) else {
                            continue;
                        };
                        device.refresh_player(player);
                        if address_changed {
                            let connection = AvrConnection::open(receiver.address.clone(), &self.config);
                            device.replace_receiver(receiver.clone(), connection);
                            updates.push(BridgeUpdate::ReceiverReplaced {
                                device_id: device.id().clone(),
                                receiver,
                            });
                        } else {
                            device.refresh_receiver(receiver);
                        }
                    }
                    IdentityAction::Destroy { pid } => {
                        if let Some(old) = devices.remove(&pid) {
                            tracing::info!("Player {} is gone", pid);
                            updates.extend(removed(&old));
                            old.destroy();
                        }
                    }
                }
            }
        }

        for update in updates {
            let _ = self.updates_tx.send(update);
        }
    }

    fn create_device(&self, player: PlayerRecord, receiver: Option<ReceiverRecord>) -> Device {
        Device::new(
            player,
            receiver,
            self.heos.clone(),
            self.catalog.clone(),
            &self.config,
        )
    }
}

/// Device first, then its zones
fn added(device: &Device) -> Vec<BridgeUpdate> {
    std::iter::once(device.id().clone())
        .chain(device.zones().iter().map(|z| z.id().clone()))
        .map(BridgeUpdate::DeviceAdded)
        .collect()
}

/// Zones first, then the device
fn removed(device: &Device) -> Vec<BridgeUpdate> {
    device
        .zones()
        .iter()
        .map(|z| z.id().clone())
        .chain(std::iter::once(device.id().clone()))
        .map(BridgeUpdate::DeviceRemoved)
        .collect()
}

/// React to system-wide HEOS events and connection transitions
async fn run_system(
    inner: Arc<BridgeInner>,
    mut frames: broadcast::Receiver<HeosFrame>,
    mut link: watch::Receiver<LinkState>,
) {
    if *link.borrow_and_update() == LinkState::Connected {
        inner.spawn_source_refresh();
    }

    loop {
        tokio::select! {
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                if *link.borrow_and_update() == LinkState::Connected {
                    inner.spawn_source_refresh();
                    inner.pass_requested.notify_one();
                }
            }
            frame = frames.recv() => match frame {
                Ok(frame) if frame.is_event() => match frame.command() {
                    "sources_changed" => {
                        tracing::info!("Music sources changed");
                        inner.spawn_source_refresh();
                    }
                    "players_changed" => {
                        tracing::info!("Player list changed");
                        inner.pass_requested.notify_one();
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Bridge missed {} HEOS frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
