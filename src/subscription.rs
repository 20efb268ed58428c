use crate::error::{BridgeError, Result};
use crate::property::{Property, PropertyValue};
use crate::types::{DeviceId, ReceiverRecord};
use tokio::sync::broadcast;

/// Transient playback notifications that are not properties
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    PlaybackProgress { position_ms: i64, duration_ms: i64 },
    PlaybackError { message: String },
}

/// Update published by a device or one of its zones
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceUpdate {
    /// A cached property changed value
    PropertyChanged {
        device_id: DeviceId,
        property: Property,
        value: PropertyValue,
    },

    /// Playback event for the device
    Event { device_id: DeviceId, event: DeviceEvent },
}

impl DeviceUpdate {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceUpdate::PropertyChanged { device_id, .. } => device_id,
            DeviceUpdate::Event { device_id, .. } => device_id,
        }
    }
}

/// Change to the set of bridged devices
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeUpdate {
    DeviceAdded(DeviceId),
    DeviceRemoved(DeviceId),
    /// A device gained a receiver connection
    DeviceUpgraded(DeviceId),
    /// A device's receiver moved to a new address
    ReceiverReplaced {
        device_id: DeviceId,
        receiver: ReceiverRecord,
    },
    /// The music source catalog was rebuilt
    SourcesChanged,
}

/// Receiver for device or bridge updates
pub struct UpdateReceiver<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> UpdateReceiver<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next update
    ///
    /// Fails with `ConnectionClosed` once the publisher is gone.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BridgeError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                BridgeError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an update without blocking
    ///
    /// Returns `None` if no message is available.
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BridgeError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(BridgeError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lag_is_reported() {
        let (tx, rx) = broadcast::channel(1);
        let mut updates = UpdateReceiver::new(rx);
        tx.send(BridgeUpdate::SourcesChanged).unwrap();
        tx.send(BridgeUpdate::DeviceAdded(DeviceId::from_pid(1))).unwrap();

        assert!(matches!(updates.recv().await, Err(BridgeError::ChannelError(_))));
        assert_eq!(
            updates.recv().await.unwrap(),
            BridgeUpdate::DeviceAdded(DeviceId::from_pid(1))
        );
        assert!(updates.try_recv().unwrap().is_none());

        drop(tx);
        assert!(matches!(updates.recv().await, Err(BridgeError::ConnectionClosed)));
    }
}
