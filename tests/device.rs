mod common;

use common::{catalog, player, receiver, test_config, MockAvr, MockHeos};
use heos_avr_bridge::{
    Action, BridgeError, Device, DeviceEvent, DeviceUpdate, MediaKind, Property, PropertyValue,
    RemoteKey, ZoneId,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn single_device() -> (Device, MockHeos) {
    let config = test_config();
    let (heos, mut mock) = MockHeos::start(&config).await;
    let device = Device::with_connections(player(1, "S1"), None, Arc::new(heos), catalog(), &config);
    mock.drain().await;
    (device, mock)
}

async fn dual_device() -> (Device, MockHeos, MockAvr) {
    let config = test_config();
    let (heos, mut mock) = MockHeos::start(&config).await;
    let (avr, mut avr_mock) = MockAvr::attach("10.0.0.5", &config);
    let device = Device::with_connections(
        player(1, "S1"),
        Some((receiver("S1", "10.0.0.5"), avr)),
        Arc::new(heos),
        catalog(),
        &config,
    );
    mock.drain().await;
    avr_mock.drain().await;
    (device, mock, avr_mock)
}

async fn wait_for(device: &Device, property: Property, expected: impl Into<PropertyValue>) {
    let expected = expected.into();
    let result = timeout(Duration::from_secs(2), async {
        while device.get(property).as_ref() != Some(&expected) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "{} never became {:?}, last value {:?}",
        property,
        expected,
        device.get(property)
    );
}

#[tokio::test]
async fn test_initial_refresh_batch() {
    let config = test_config();
    let (heos, mut mock) = MockHeos::start(&config).await;
    let _device = Device::with_connections(player(7, "S7"), None, Arc::new(heos), catalog(), &config);

    let mut requests = Vec::new();
    for _ in 0..5 {
        requests.push(mock.next_request().await);
    }
    assert_eq!(
        requests,
        vec![
            "heos://player/get_play_state?pid=7",
            "heos://player/get_now_playing_media?pid=7",
            "heos://player/get_volume?pid=7",
            "heos://player/get_mute?pid=7",
            "heos://player/get_play_mode?pid=7",
        ]
    );
}

#[tokio::test]
async fn test_stop_event_clears_session() {
    let (device, mock) = single_device().await;

    mock.push(json!({
        "heos": {"command": "player/get_now_playing_media", "result": "success", "message": "pid=1"},
        "payload": {"type": "station", "song": "Song", "station": "Radio Paradise", "album": "",
                    "artist": "Artist", "image_url": "", "mid": "s1", "qid": 1, "sid": 3},
        "options": [{"play": [{"id": 19, "name": "Add to HEOS Favorites"}]}]
    }));
    mock.push_event("player_state_changed", "pid=1&state=play");
    wait_for(&device, Property::Playing, true).await;
    assert_eq!(device.media_kind(), Some(MediaKind::Station));
    assert_eq!(device.play_options().len(), 1);
    assert_eq!(device.get(Property::Source), Some("TuneIn".into()));

    mock.push_event("player_state_changed", "pid=1&state=stop");
    wait_for(&device, Property::Playing, false).await;
    assert_eq!(device.media_kind(), None);
    assert!(device.play_options().is_empty());
}

#[tokio::test]
async fn test_frames_for_other_players_are_ignored() {
    let (device, mock) = single_device().await;

    mock.push_event("player_volume_changed", "pid=2&level=80&mute=off");
    mock.push_event("player_volume_changed", "pid=1&level=15&mute=off");
    wait_for(&device, Property::Volume, 15.0).await;
}

#[tokio::test]
async fn test_repeated_report_touches_timestamp_without_notifying() {
    let (device, mock) = single_device().await;

    mock.push_event("player_volume_changed", "pid=1&level=15&mute=off");
    wait_for(&device, Property::Volume, 15.0).await;
    let first = device.updated_at(Property::Volume).unwrap();
    let mut updates = device.updates();

    sleep(Duration::from_millis(20)).await;
    mock.push_event("player_volume_changed", "pid=1&level=15&mute=off");
    timeout(Duration::from_secs(2), async {
        while device.updated_at(Property::Volume) == Some(first) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(device.updated_at(Property::Volume).unwrap() > first);
    assert!(matches!(updates.try_recv(), Ok(None)));
}

#[tokio::test]
async fn test_equal_writes_send_nothing() {
    let (device, mut mock) = single_device().await;

    mock.push_event("player_volume_changed", "pid=1&level=10&mute=on");
    wait_for(&device, Property::Muted, true).await;

    device.set_property(Property::Muted, true).await.unwrap();
    device.set_property(Property::Volume, 11.0).await.unwrap();
    assert_eq!(mock.next_request().await, "heos://player/set_volume?pid=1&level=11");
    // the echoed response updates the cache
    wait_for(&device, Property::Volume, 11.0).await;
}

#[tokio::test]
async fn test_equal_receiver_writes_send_nothing() {
    let (device, _mock, mut avr) = dual_device().await;

    avr.push(&["MUON"]);
    wait_for(&device, Property::Muted, true).await;

    device.set_property(Property::Muted, true).await.unwrap();
    device.set_property(Property::Power, true).await.unwrap();
    assert_eq!(avr.next_command().await, "PWON");
}

#[tokio::test]
async fn test_half_step_volume_on_the_wire() {
    let (device, _mock, mut avr) = dual_device().await;

    device.set_property(Property::Volume, 45.5).await.unwrap();
    assert_eq!(avr.next_command().await, "MV455");

    avr.push(&["MV455"]);
    wait_for(&device, Property::Volume, 45.5).await;
}

#[tokio::test]
async fn test_invalid_writes_are_rejected_before_io() {
    let (device, mut mock, mut avr) = dual_device().await;

    assert!(matches!(
        device.set_property(Property::Volume, 45.25).await,
        Err(BridgeError::Validation(_))
    ));
    assert!(matches!(
        device.set_property(Property::Title, "Other").await,
        Err(BridgeError::Validation(_))
    ));
    assert!(matches!(
        device.set_property(Property::Source, "RADIO").await,
        Err(BridgeError::Validation(_))
    ));
    assert!(avr.drain().await.is_empty());
    assert!(mock.drain().await.is_empty());
    assert_eq!(device.get(Property::Volume), None);
}

#[tokio::test]
async fn test_receiver_owns_volume_on_dual_device() {
    let (device, mut mock, avr) = dual_device().await;

    avr.push(&["MV30"]);
    wait_for(&device, Property::Volume, 30.0).await;

    mock.push_event("player_volume_changed", "pid=1&level=12&mute=off");
    wait_for(&device, Property::HeosVolume, 12.0).await;
    assert_eq!(device.get(Property::Volume), Some(30.0.into()));
    assert_eq!(device.get(Property::HeosMuted), Some(false.into()));

    device.set_property(Property::HeosVolume, 20.0).await.unwrap();
    assert_eq!(mock.next_request().await, "heos://player/set_volume?pid=1&level=20");
    wait_for(&device, Property::HeosVolume, 20.0).await;
    assert_eq!(device.get(Property::Volume), Some(30.0.into()));
}

#[tokio::test]
async fn test_tuner_station_name() {
    let (device, _mock, avr) = dual_device().await;

    avr.push(&["SITUNER", "TMANFM", "TMANAUTO", "TFAN010570", "TFANNAMEBBC R4"]);
    wait_for(&device, Property::Station, "BBC R4").await;
    assert_eq!(device.get(Property::TunerFrequency), Some(105.7.into()));
    assert_eq!(device.get(Property::Source), Some("TUNER".into()));
    // the tuning mode reply to TMAN? leaves the band alone
    assert_eq!(device.get(Property::TunerBand), Some("FM".into()));
}

#[tokio::test]
async fn test_play_mode_uses_cached_repeat() {
    let (device, mut mock) = single_device().await;

    mock.push_event("repeat_mode_changed", "pid=1&repeat=on_all");
    wait_for(&device, Property::Repeat, "on_all").await;

    device.set_property(Property::Shuffle, true).await.unwrap();
    assert_eq!(
        mock.next_request().await,
        "heos://player/set_play_mode?pid=1&repeat=on_all&shuffle=on"
    );
}

#[tokio::test]
async fn test_now_playing_changed_refetches_media() {
    let (_device, mut mock) = single_device().await;

    mock.push_event("player_now_playing_changed", "pid=1");
    assert_eq!(
        mock.next_request().await,
        "heos://player/get_now_playing_media?pid=1"
    );
}

#[tokio::test]
async fn test_playback_events() {
    let (device, mock) = single_device().await;
    let mut updates = device.updates();

    mock.push_event("player_now_playing_progress", "pid=1&cur_pos=5000&duration=180000");
    let update = timeout(Duration::from_secs(2), updates.recv()).await.unwrap().unwrap();
    assert_eq!(
        update,
        DeviceUpdate::Event {
            device_id: device.id().clone(),
            event: DeviceEvent::PlaybackProgress {
                position_ms: 5000,
                duration_ms: 180000
            },
        }
    );
}

#[tokio::test]
async fn test_actions() {
    let (device, mut mock, mut avr) = dual_device().await;

    device.invoke(Action::Next).await.unwrap();
    assert_eq!(mock.next_request().await, "heos://player/play_next?pid=1");

    device.invoke(Action::PlayPreset(3)).await.unwrap();
    assert_eq!(mock.next_request().await, "heos://browse/play_preset?pid=1&preset=3");

    device.invoke(Action::VolumeUp).await.unwrap();
    device.invoke(Action::RemoteKey(RemoteKey::MenuOn)).await.unwrap();
    device.invoke(Action::Raw("CVFL 60".to_string())).await.unwrap();
    assert_eq!(avr.next_command().await, "MVUP");
    assert_eq!(avr.next_command().await, "MNMEN ON");
    assert_eq!(avr.next_command().await, "CVFL 60");

    assert!(matches!(
        device.invoke(Action::PlayPreset(0)).await,
        Err(BridgeError::Validation(_))
    ));
}

#[tokio::test]
async fn test_receiver_actions_need_a_receiver() {
    let (device, mut mock) = single_device().await;

    assert!(device.zone(ZoneId::Zone2).is_none());
    assert!(matches!(
        device.invoke(Action::RemoteKey(RemoteKey::Up)).await,
        Err(BridgeError::Validation(_))
    ));

    device.invoke(Action::VolumeDown).await.unwrap();
    assert_eq!(mock.next_request().await, "heos://player/volume_down?pid=1");
}

#[tokio::test]
async fn test_zone_power_on_refreshes_once() {
    let (device, _mock, mut avr) = dual_device().await;
    let zone = device.zone(ZoneId::Zone2).unwrap();
    assert_eq!(zone.id().as_str(), "heos-1-z2");

    avr.push(&["Z2ON"]);
    assert_eq!(avr.next_command().await, "Z2?");
    assert_eq!(avr.next_command().await, "Z2MU?");
    assert_eq!(zone.get(Property::Power), Some(true.into()));

    avr.push(&["Z2OFF", "Z2ON", "Z250"]);
    timeout(Duration::from_secs(2), async {
        while zone.get(Property::Volume) != Some(50.0.into()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(avr.drain().await.is_empty());

    zone.set_property(Property::Volume, 40.0).await.unwrap();
    zone.set_property(Property::Input, "TUNER").await.unwrap();
    assert_eq!(avr.next_command().await, "Z240");
    assert_eq!(avr.next_command().await, "Z2TUNER");
}

#[tokio::test]
async fn test_destroyed_device_rejects_commands() {
    let (device, _mock, _avr) = dual_device().await;
    let zone = device.zone(ZoneId::Zone2).unwrap();

    device.destroy();
    assert!(!zone.is_alive());
    assert!(matches!(
        zone.set_property(Property::Power, true).await,
        Err(BridgeError::DeviceNotFound(_))
    ));
    assert!(matches!(
        device.invoke(Action::Play).await,
        Err(BridgeError::DeviceNotFound(_))
    ));
}
