#![allow(dead_code)]

use heos_avr_bridge::{
    AvrConnection, BridgeConfig, HeosConnection, PlayerRecord, ReceiverRecord, SharedSourceCatalog,
    SourceCatalog,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        request_timeout_secs: 2,
        heartbeat_secs: 0,
        avr_command_spacing_ms: 0,
        ..BridgeConfig::default()
    }
}

pub fn player(pid: i64, serial: &str) -> PlayerRecord {
    PlayerRecord {
        pid,
        name: format!("Player {}", pid),
        model: "Denon AVR-X3700H".to_string(),
        serial: Some(serial.to_string()),
    }
}

pub fn catalog() -> SharedSourceCatalog {
    let catalog = SourceCatalog::from_payload(&json!([
        {"name": "TuneIn", "sid": 3},
        {"name": "Spotify", "sid": 4}
    ]))
    .unwrap();
    Arc::new(RwLock::new(catalog))
}

pub fn receiver(serial: &str, address: &str) -> ReceiverRecord {
    ReceiverRecord {
        address: address.to_string(),
        serial: serial.to_string(),
        uuid: Uuid::nil(),
        friendly_name: "Living Room".to_string(),
        model_name: "AVR-X3700H".to_string(),
    }
}

/// Fake HEOS system
///
/// Every request is recorded and answered with a success frame whose message
/// echoes the request parameters, plus a payload when one is configured for
/// the command. Dropping the mock closes its end of the stream.
pub struct MockHeos {
    requests: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    payloads: Arc<Mutex<HashMap<String, Value>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockHeos {
    pub async fn start(config: &BridgeConfig) -> (HeosConnection, MockHeos) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let connection = HeosConnection::attach(client, config);
        let mut mock = Self::serve(server);

        assert_eq!(
            mock.next_request().await,
            "heos://system/register_for_change_events?enable=on"
        );
        connection.wait_connected(WAIT).await.unwrap();
        (connection, mock)
    }

    pub fn serve<S>(stream: S) -> MockHeos
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let payloads: Arc<Mutex<HashMap<String, Value>>> = Arc::default();

        let writer = tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let responder = outgoing.clone();
        let known = payloads.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request = line.trim_end().to_string();
                let target = request.trim_start_matches("heos://");
                let (command, params) = target.split_once('?').unwrap_or((target, ""));

                let mut response = json!({
                    "heos": {"command": command, "result": "success", "message": params}
                });
                if let Some(payload) = known.lock().unwrap().get(command) {
                    response["payload"] = payload.clone();
                }
                let _ = responder.send(format!("{}\r\n", response));
                if requests_tx.send(request).is_err() {
                    break;
                }
            }
        });

        MockHeos {
            requests,
            outgoing,
            payloads,
            tasks: vec![writer, reader],
        }
    }

    /// Answer `command` (e.g. `player/get_players`) with this payload from now on
    pub fn set_payload(&self, command: &str, payload: Value) {
        self.payloads.lock().unwrap().insert(command.to_string(), payload);
    }

    /// Push an unsolicited frame to the client
    pub fn push(&self, frame: Value) {
        self.outgoing.send(format!("{}\r\n", frame)).unwrap();
    }

    pub fn push_event(&self, command: &str, message: &str) {
        self.push(json!({"heos": {"command": format!("event/{}", command), "message": message}}));
    }

    pub async fn next_request(&mut self) -> String {
        timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a HEOS request")
            .expect("mock closed")
    }

    /// Skip requests until one starts with `prefix`
    pub async fn expect_request(&mut self, prefix: &str) -> String {
        loop {
            let request = self.next_request().await;
            if request.starts_with(prefix) {
                return request;
            }
        }
    }

    /// Wait until nothing has been requested for a short while
    pub async fn drain(&mut self) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(Some(request)) = timeout(Duration::from_millis(200), self.requests.recv()).await {
            seen.push(request);
        }
        seen
    }
}

impl Drop for MockHeos {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Fake receiver control port; dropping it closes its end of the stream
pub struct MockAvr {
    commands: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockAvr {
    pub fn attach(address: &str, config: &BridgeConfig) -> (AvrConnection, MockAvr) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let connection = AvrConnection::attach(address, client, config);
        (connection, Self::serve(server))
    }

    pub fn serve<S>(stream: S) -> MockAvr
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = match read_half.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
                while let Some(end) = buf.iter().position(|b| *b == b'\r') {
                    let line: Vec<u8> = buf.drain(..=end).collect();
                    let command = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
                    if commands_tx.send(command).is_err() {
                        return;
                    }
                }
            }
        });

        MockAvr {
            commands,
            outgoing,
            tasks: vec![writer, reader],
        }
    }

    /// Send lines to the client, each terminated with `\r`
    pub fn push(&self, lines: &[&str]) {
        for line in lines {
            self.outgoing.send(format!("{}\r", line)).unwrap();
        }
    }

    pub async fn next_command(&mut self) -> String {
        timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for a receiver command")
            .expect("mock closed")
    }

    /// Skip commands until this exact one arrives
    pub async fn expect_command(&mut self, expected: &str) {
        loop {
            if self.next_command().await == expected {
                return;
            }
        }
    }

    pub async fn drain(&mut self) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(Some(command)) = timeout(Duration::from_millis(200), self.commands.recv()).await {
            seen.push(command);
        }
        seen
    }
}

impl Drop for MockAvr {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
