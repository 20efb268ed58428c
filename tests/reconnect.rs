mod common;

use common::{catalog, player, receiver, test_config, MockAvr, MockHeos};
use heos_avr_bridge::{AvrConnection, BridgeConfig, Device, HeosConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Long enough for the first reconnect delay plus the connect itself
const ACCEPT_WAIT: Duration = Duration::from_secs(5);

async fn accept(listener: &TcpListener) -> tokio::net::TcpStream {
    let (stream, _) = timeout(ACCEPT_WAIT, listener.accept())
        .await
        .expect("timed out waiting for a reconnect")
        .unwrap();
    stream
}

#[tokio::test]
async fn test_player_refresh_is_reissued_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = BridgeConfig {
        heos_port: listener.local_addr().unwrap().port(),
        reconnect_initial_secs: 1,
        ..test_config()
    };

    let heos = HeosConnection::open("127.0.0.1", &config);
    let _device = Device::with_connections(player(3, "S3"), None, Arc::new(heos), catalog(), &config);

    for session in 0..2 {
        let mut mock = MockHeos::serve(accept(&listener).await);
        mock.expect_request("heos://system/register_for_change_events?enable=on").await;

        let mut requests = Vec::new();
        for _ in 0..5 {
            requests.push(mock.next_request().await);
        }
        assert_eq!(
            requests,
            vec![
                "heos://player/get_play_state?pid=3",
                "heos://player/get_now_playing_media?pid=3",
                "heos://player/get_volume?pid=3",
                "heos://player/get_mute?pid=3",
                "heos://player/get_play_mode?pid=3",
            ],
            "session {}",
            session
        );
        // closes the socket; the connection reconnects on its own
        drop(mock);
    }
}

#[tokio::test]
async fn test_receiver_refresh_is_reissued_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = BridgeConfig {
        avr_port: listener.local_addr().unwrap().port(),
        reconnect_initial_secs: 1,
        ..test_config()
    };

    let (heos, _heos_mock) = MockHeos::start(&config).await;
    let avr = AvrConnection::open("127.0.0.1", &config);
    let _device = Device::with_connections(
        player(1, "S1"),
        Some((receiver("S1", "127.0.0.1"), avr)),
        Arc::new(heos),
        catalog(),
        &config,
    );

    for session in 0..2 {
        let mut mock = MockAvr::serve(accept(&listener).await);

        let mut commands = Vec::new();
        for _ in 0..10 {
            commands.push(mock.next_command().await);
        }
        assert_eq!(
            commands,
            vec!["PW?", "MV?", "MU?", "SI?", "MS?", "TFAN?", "TMAN?", "TPAN?", "PSLFC ?", "Z2?"],
            "session {}",
            session
        );
        drop(mock);
    }
}
