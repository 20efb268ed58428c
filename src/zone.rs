use crate::device::DeviceInner;
use crate::error::Result;
use crate::property::{Property, PropertySpec, PropertyValue};
use crate::subscription::{DeviceUpdate, UpdateReceiver};
use crate::types::{DeviceId, ZoneId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Secondary output zone of a dual-protocol device
///
/// Shares its parent's receiver connection. Once the parent is destroyed
/// every command fails with `DeviceNotFound`.
#[derive(Clone)]
pub struct Zone {
    parent: Arc<DeviceInner>,
    zone: ZoneId,
    id: DeviceId,
}

impl Zone {
    pub(crate) fn new(parent: Arc<DeviceInner>, zone: ZoneId) -> Self {
        let id = parent.id.zone(zone);
        Self { parent, zone, id }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone
    }

    pub fn parent_id(&self) -> &DeviceId {
        &self.parent.id
    }

    /// False once the parent device has been destroyed
    pub fn is_alive(&self) -> bool {
        !self.parent.is_destroyed()
    }

    pub fn schema(&self) -> &[PropertySpec] {
        self.parent.zone_schema(self.zone)
    }

    pub fn get(&self, property: Property) -> Option<PropertyValue> {
        self.parent.zone_value(self.zone, property)
    }

    pub fn snapshot(&self) -> BTreeMap<Property, PropertyValue> {
        self.parent.zone_snapshot(self.zone)
    }

    pub fn updated_at(&self, property: Property) -> Option<Instant> {
        self.parent.zone_updated_at(self.zone, property)
    }

    /// Write a zone property (`power`, `input`, `volume` or `muted`)
    pub async fn set_property(&self, property: Property, value: impl Into<PropertyValue>) -> Result<()> {
        self.parent.write(Some(self.zone), property, value.into()).await
    }

    /// Updates of the parent device; zone changes carry this zone's id
    pub fn updates(&self) -> UpdateReceiver<DeviceUpdate> {
        self.parent.subscribe()
    }
}
