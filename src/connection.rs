use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::link::{Backoff, LinkState};
use crate::protocol::{CommandKey, HeosCommand, HeosFrame};
use bytes::{BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

/// Payloads such as `get_players` can be large
const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// A request waiting for its response
struct PendingRequest {
    id: u64,
    tx: oneshot::Sender<Result<HeosFrame>>,
}

/// Mutable connection state
struct ConnectionState {
    /// Pending requests per key; the front entry is the armed one
    pending_requests: HashMap<CommandKey, VecDeque<PendingRequest>>,
    /// Channel for outgoing lines, present while a session is up
    writer: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    state: Mutex<ConnectionState>,
    /// Every inbound frame, in arrival order
    frames_tx: broadcast::Sender<HeosFrame>,
    link_tx: watch::Sender<LinkState>,
    next_id: AtomicU64,
    request_timeout: Duration,
    heartbeat: Option<Duration>,
    shutdown: CancellationToken,
}

/// Connection to the HEOS CLI, shared by every player of a system
///
/// Owns one socket and its read loop. All inbound frames are published to
/// every subscriber; requests are matched to responses by `(group, command)`.
pub struct HeosConnection {
    shared: Arc<Shared>,
}

impl HeosConnection {
    fn new(config: &BridgeConfig) -> Self {
        let (frames_tx, _) = broadcast::channel(config.channel_capacity);
        let (link_tx, _) = watch::channel(LinkState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState {
                    pending_requests: HashMap::new(),
                    writer: None,
                }),
                frames_tx,
                link_tx,
                next_id: AtomicU64::new(0),
                request_timeout: config.request_timeout(),
                heartbeat: config.heartbeat(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Open a connection to a HEOS player and keep it connected
    ///
    /// Returns immediately; the socket is established in the background and
    /// re-established with exponential backoff whenever it drops.
    pub fn open(host: impl Into<String>, config: &BridgeConfig) -> Self {
        let conn = Self::new(config);
        let shared = conn.shared.clone();
        let addr = format!("{}:{}", host.into(), config.heos_port);
        let connect_timeout = config.connect_timeout();
        let mut backoff = Backoff::new(config.reconnect_initial(), config.reconnect_max());

        tokio::spawn(async move {
            loop {
                if !backoff.current().is_zero() {
                    tracing::info!("Reconnecting to HEOS at {} in {:?}", addr, backoff.current());
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => break,
                        _ = sleep(backoff.current()) => {}
                    }
                }
                if shared.shutdown.is_cancelled() {
                    break;
                }

                tracing::info!("Connecting to HEOS at {}", addr);
                shared.link_tx.send_replace(LinkState::Connecting);

                match timeout(connect_timeout, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => {
                        tracing::info!("Connected to HEOS at {}", addr);
                        backoff.reset();
                        run_session(&shared, stream).await;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Failed to connect to HEOS at {}: {}", addr, e);
                        shared.link_tx.send_replace(LinkState::Disconnected);
                    }
                    Err(_) => {
                        tracing::warn!("Timed out connecting to HEOS at {}", addr);
                        shared.link_tx.send_replace(LinkState::Disconnected);
                    }
                }
                backoff.fail();
            }
            tracing::debug!("HEOS connection to {} stopped", addr);
        });

        conn
    }

    /// Run a single session over an already established stream, without reconnecting
    pub fn attach<S>(stream: S, config: &BridgeConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Self::new(config);
        let shared = conn.shared.clone();
        tokio::spawn(async move {
            run_session(&shared, stream).await;
        });
        conn
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.shared.link_tx.borrow()
    }

    /// Watch link state transitions
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.link_tx.subscribe()
    }

    /// Subscribe to every inbound frame
    pub fn subscribe(&self) -> broadcast::Receiver<HeosFrame> {
        self.shared.frames_tx.subscribe()
    }

    /// Wait until the connection reports `Connected`
    pub async fn wait_connected(&self, within: Duration) -> Result<()> {
        let mut rx = self.shared.link_tx.subscribe();
        let result = timeout(within, rx.wait_for(|s| *s == LinkState::Connected)).await;
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::ConnectionClosed),
            Err(_) => Err(BridgeError::Timeout),
        }
    }

    /// Send a command and wait for the next frame with the same `(group, command)`
    pub async fn request(&self, command: HeosCommand) -> Result<HeosFrame> {
        self.shared.request(command).await
    }

    /// Send a command without waiting for a response (fire and forget)
    pub async fn send_only(&self, command: HeosCommand) -> Result<()> {
        let state = self.shared.state.lock().await;
        let writer = state.writer.as_ref().ok_or(BridgeError::NotConnected)?;
        let line = command.to_wire();
        tracing::debug!("Sending (no response): {}", line);

        writer.send(line).map_err(|_| BridgeError::NotConnected)
    }

    /// Stop the connection; pending requests fail with `ConnectionClosed`
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }
}

impl Drop for HeosConnection {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl Shared {
    async fn request(&self, command: HeosCommand) -> Result<HeosFrame> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = command.key().clone();
        let (tx, rx) = oneshot::channel();

        // Register before writing so a fast response cannot be missed
        {
            let mut state = self.state.lock().await;
            let writer = state.writer.clone().ok_or(BridgeError::NotConnected)?;
            state
                .pending_requests
                .entry(key.clone())
                .or_default()
                .push_back(PendingRequest { id, tx });

            let line = command.to_wire();
            tracing::debug!("Sending: {}", line);

            if writer.send(line).is_err() {
                remove_pending(&mut state, &key, id);
                return Err(BridgeError::NotConnected);
            }
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::ConnectionClosed),
            Err(_) => {
                let mut state = self.state.lock().await;
                remove_pending(&mut state, &key, id);
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Handle an incoming line
    async fn handle_line(&self, line: &str) {
        tracing::debug!("Received: {}", line);

        let frame = match HeosFrame::parse(line) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping unparseable HEOS frame: {}", e);
                return;
            }
        };

        if !frame.is_under_process() {
            let mut state = self.state.lock().await;
            let drained = match state.pending_requests.get_mut(&frame.key) {
                Some(queue) => {
                    let mut result = if frame.is_failure() {
                        Err(frame.failure())
                    } else {
                        Ok(frame.clone())
                    };
                    // Skip requests whose caller has gone away
                    while let Some(pending) = queue.pop_front() {
                        match pending.tx.send(result) {
                            Ok(()) => break,
                            Err(unsent) => result = unsent,
                        }
                    }
                    queue.is_empty()
                }
                None => false,
            };
            if drained {
                state.pending_requests.remove(&frame.key);
            }
        }

        let _ = self.frames_tx.send(frame);
    }

    /// Drop the writer and fail every pending request
    async fn teardown(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            state.writer = None;
            std::mem::take(&mut state.pending_requests)
        };

        let mut failed = 0;
        for pending in pending.into_values().flatten() {
            let _ = pending.tx.send(Err(BridgeError::ConnectionClosed));
            failed += 1;
        }
        if failed > 0 {
            tracing::debug!("Failed {} pending HEOS request(s) on disconnect", failed);
        }

        self.link_tx.send_replace(LinkState::Disconnected);
    }
}

fn remove_pending(state: &mut ConnectionState, key: &CommandKey, id: u64) {
    if let Some(queue) = state.pending_requests.get_mut(key) {
        queue.retain(|p| p.id != id);
        if queue.is_empty() {
            state.pending_requests.remove(key);
        }
    }
}

/// Run one session: read loop, writer, change-event registration and heartbeat
async fn run_session<S>(shared: &Arc<Shared>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sink, mut lines) = Framed::new(stream, HeosCodec::new()).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    shared.state.lock().await.writer = Some(tx);
    shared.link_tx.send_replace(LinkState::Resubscribing);

    let write_loop = async {
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::error!("Failed to send HEOS command: {}", e);
                break;
            }
        }
    };

    let read_loop = async {
        while let Some(item) = lines.next().await {
            match item {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => shared.handle_line(&line).await,
                Err(e) => {
                    tracing::error!("HEOS read error: {}", e);
                    break;
                }
            }
        }
        tracing::info!("HEOS connection closed");
    };

    let maintenance = async {
        let register =
            HeosCommand::new("system", "register_for_change_events").param("enable", "on");
        if let Err(e) = shared.request(register).await {
            tracing::warn!("Failed to register for HEOS change events: {}", e);
        }
        shared.link_tx.send_replace(LinkState::Connected);

        match shared.heartbeat {
            Some(period) => {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    if let Err(e) = shared.request(HeosCommand::new("system", "heart_beat")).await {
                        tracing::warn!("HEOS heartbeat failed: {}", e);
                    }
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = write_loop => {}
        _ = read_loop => {}
        _ = maintenance => {}
        _ = shared.shutdown.cancelled() => {
            tracing::debug!("HEOS session cancelled");
        }
    }

    shared.teardown().await;
}

/// JSON lines in, `\r\n`-terminated command lines out
struct HeosCodec {
    lines: LinesCodec,
}

impl HeosCodec {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
        }
    }
}

impl Decoder for HeosCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<String>, LinesCodecError> {
        self.lines.decode(buf)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<String>, LinesCodecError> {
        self.lines.decode_eof(buf)
    }
}

impl Encoder<String> for HeosCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> std::result::Result<(), LinesCodecError> {
        buf.reserve(line.len() + 2);
        buf.put_slice(line.as_bytes());
        buf.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            request_timeout_secs: 2,
            heartbeat_secs: 0,
            ..BridgeConfig::default()
        }
    }

    fn response(command: &str, message: &str) -> String {
        format!(
            "{}\r\n",
            serde_json::json!({"heos": {"command": command, "result": "success", "message": message}})
        )
    }

    /// Attach a connection to an in-memory pipe and answer the event registration
    async fn connected_pair() -> (HeosConnection, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = HeosConnection::attach(client, &test_config());
        let mut server = BufReader::new(server);

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line, "heos://system/register_for_change_events?enable=on\r\n");
        server
            .get_mut()
            .write_all(response("system/register_for_change_events", "enable=on").as_bytes())
            .await
            .unwrap();

        conn.wait_connected(Duration::from_secs(2)).await.unwrap();
        (conn, server)
    }

    #[tokio::test]
    async fn test_request_resolves_on_matching_key() {
        let (conn, mut server) = connected_pair().await;

        let pending = tokio::spawn(async move {
            let result = conn
                .request(HeosCommand::new("player", "get_volume").for_player(1))
                .await;
            (conn, result)
        });

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line, "heos://player/get_volume?pid=1\r\n");

        // Unrelated frames interleave before the response
        server
            .get_mut()
            .write_all(response("player/get_mute", "pid=1&state=off").as_bytes())
            .await
            .unwrap();
        server
            .get_mut()
            .write_all(response("player/get_volume", "pid=1&level=42").as_bytes())
            .await
            .unwrap();

        let (_conn, result) = pending.await.unwrap();
        let frame = result.unwrap();
        assert_eq!(frame.message.get("level"), Some("42"));
    }

    #[tokio::test]
    async fn test_failure_result_rejects_request() {
        let (conn, mut server) = connected_pair().await;

        let pending = tokio::spawn(async move {
            conn.request(HeosCommand::new("player", "set_volume").for_player(1).param("level", 200))
                .await
        });

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        let failure = serde_json::json!({"heos": {
            "command": "player/set_volume", "result": "fail", "message": "eid=9&text=Parameter out of range"
        }});
        server
            .get_mut()
            .write_all(format!("{}\r\n", failure).as_bytes())
            .await
            .unwrap();

        match pending.await.unwrap() {
            Err(BridgeError::CommandFailed { eid, .. }) => assert_eq!(eid, Some(9)),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fan_out_sees_correlated_frames() {
        let (conn, mut server) = connected_pair().await;
        let mut frames = conn.subscribe();
        let conn = Arc::new(conn);

        let requester = conn.clone();
        let pending = tokio::spawn(async move {
            requester
                .request(HeosCommand::new("player", "get_mute").for_player(3))
                .await
        });

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        server
            .get_mut()
            .write_all(response("player/get_mute", "pid=3&state=on").as_bytes())
            .await
            .unwrap();

        assert!(pending.await.unwrap().is_ok());
        let seen = frames.recv().await.unwrap();
        assert_eq!(seen.command(), "get_mute");
        assert_eq!(seen.pid(), Some(3));
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_requests() {
        let (conn, mut server) = connected_pair().await;
        let mut state = conn.watch_state();

        let pending = tokio::spawn(async move {
            let result = conn
                .request(HeosCommand::new("player", "get_play_state").for_player(1))
                .await;
            (conn, result)
        });

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        drop(server);

        let (conn, result) = pending.await.unwrap();
        assert!(matches!(result, Err(BridgeError::ConnectionClosed)));

        state
            .wait_for(|s| *s == LinkState::Disconnected)
            .await
            .unwrap();
        assert_eq!(conn.state(), LinkState::Disconnected);

        // No queueing across reconnects
        let after = conn.request(HeosCommand::new("player", "get_volume")).await;
        assert!(matches!(after, Err(BridgeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_under_process_does_not_resolve() {
        let (conn, mut server) = connected_pair().await;

        let pending = tokio::spawn(async move {
            conn.request(HeosCommand::new("browse", "play_preset").for_player(1).param("preset", 2))
                .await
        });

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        server
            .get_mut()
            .write_all(response("browse/play_preset", "command under process&pid=1").as_bytes())
            .await
            .unwrap();
        server
            .get_mut()
            .write_all(response("browse/play_preset", "pid=1&preset=2").as_bytes())
            .await
            .unwrap();

        let frame = pending.await.unwrap().unwrap();
        assert_eq!(frame.message.get("preset"), Some("2"));
    }
}
