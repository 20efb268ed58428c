use crate::types::{Pid, PlayerRecord, ReceiverRecord};
use std::collections::{BTreeMap, BTreeSet};

/// What the bridge currently knows about a device
#[derive(Debug, Clone, PartialEq)]
pub struct KnownDevice {
    pub dual_protocol: bool,
    /// Address of the receiver connection, if any
    pub receiver_address: Option<String>,
}

/// Step needed to reconcile the device table with a discovery pass
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityAction {
    /// New pid
    Create {
        player: PlayerRecord,
        receiver: Option<ReceiverRecord>,
    },
    /// Known pid, nothing changes but the player record
    RefreshPlayer { player: PlayerRecord },
    /// Single-protocol device found its receiver; rebuilt as dual-protocol
    Upgrade {
        player: PlayerRecord,
        receiver: ReceiverRecord,
    },
    /// Dual-protocol device seen again with its receiver
    RefreshReceiver {
        player: PlayerRecord,
        receiver: ReceiverRecord,
        /// The receiver connection must be replaced
        address_changed: bool,
    },
    /// Pid no longer reported
    Destroy { pid: Pid },
}

/// Serial join predicate: trimmed, case-insensitive, never matches empty serials
pub fn serials_match(player: &PlayerRecord, receiver: &ReceiverRecord) -> bool {
    let Some(serial) = player.serial.as_deref().map(str::trim) else {
        return false;
    };
    !serial.is_empty() && serial.eq_ignore_ascii_case(receiver.serial.trim())
}

/// Plan the actions for one discovery pass
///
/// Compares the pass against the devices the bridge already knows and returns
/// the actions that bring the table in line. Players are handled in pid order;
/// destroys come last.
pub fn resolve(
    known: &BTreeMap<Pid, KnownDevice>,
    players: &[PlayerRecord],
    receivers: &[ReceiverRecord],
) -> Vec<IdentityAction> {
    let reported: BTreeMap<Pid, &PlayerRecord> = players.iter().map(|p| (p.pid, p)).collect();
    let mut actions = Vec::with_capacity(reported.len());

    for player in reported.values() {
        let player = (*player).clone();
        let receiver = receivers.iter().find(|r| serials_match(&player, r)).cloned();

        let action = match (known.get(&player.pid), receiver) {
            (None, receiver) => IdentityAction::Create { player, receiver },
            (Some(device), Some(receiver)) if !device.dual_protocol => {
                IdentityAction::Upgrade { player, receiver }
            }
            (Some(device), Some(receiver)) => IdentityAction::RefreshReceiver {
                address_changed: device.receiver_address.as_deref() != Some(receiver.address.as_str()),
                player,
                receiver,
            },
            // A dual-protocol device missing its receiver this pass keeps it
            (Some(_), None) => IdentityAction::RefreshPlayer { player },
        };
        actions.push(action);
    }

    let reported: BTreeSet<Pid> = reported.into_keys().collect();
    actions.extend(
        known
            .keys()
            .filter(|pid| !reported.contains(pid))
            .map(|pid| IdentityAction::Destroy { pid: *pid }),
    );

    actions
}
