use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::line_codec::{parse_line, AvrCommand, AvrLineCodec, AvrMessage};
use crate::link::{Backoff, LinkState};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

struct Shared {
    /// Channel for outgoing lines, present while a session is up
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    messages_tx: broadcast::Sender<AvrMessage>,
    link_tx: watch::Sender<LinkState>,
    spacing: Duration,
    shutdown: CancellationToken,
}

/// Connection to a receiver's line-protocol control port
///
/// Commands are fire-and-forget; the receiver reports state changes as
/// unsolicited lines, which are classified and published to subscribers.
pub struct AvrConnection {
    address: String,
    shared: Arc<Shared>,
}

impl AvrConnection {
    fn new(address: String, config: &BridgeConfig) -> Self {
        let (messages_tx, _) = broadcast::channel(config.channel_capacity);
        let (link_tx, _) = watch::channel(LinkState::Disconnected);

        Self {
            address,
            shared: Arc::new(Shared {
                writer: Mutex::new(None),
                messages_tx,
                link_tx,
                spacing: config.avr_command_spacing(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Open a connection to the receiver at `address` and keep it connected
    pub fn open(address: impl Into<String>, config: &BridgeConfig) -> Self {
        let conn = Self::new(address.into(), config);
        let shared = conn.shared.clone();
        let addr = format!("{}:{}", conn.address, config.avr_port);
        let connect_timeout = config.connect_timeout();
        let mut backoff = Backoff::new(config.reconnect_initial(), config.reconnect_max());

        tokio::spawn(async move {
            loop {
                if !backoff.current().is_zero() {
                    tracing::info!("Reconnecting to receiver at {} in {:?}", addr, backoff.current());
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => break,
                        _ = sleep(backoff.current()) => {}
                    }
                }
                if shared.shutdown.is_cancelled() {
                    break;
                }

                tracing::info!("Connecting to receiver at {}", addr);
                shared.link_tx.send_replace(LinkState::Connecting);

                match timeout(connect_timeout, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => {
                        tracing::info!("Connected to receiver at {}", addr);
                        backoff.reset();
                        run_session(&shared, stream).await;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Failed to connect to receiver at {}: {}", addr, e);
                        shared.link_tx.send_replace(LinkState::Disconnected);
                    }
                    Err(_) => {
                        tracing::warn!("Timed out connecting to receiver at {}", addr);
                        shared.link_tx.send_replace(LinkState::Disconnected);
                    }
                }
                backoff.fail();
            }
            tracing::debug!("Receiver connection to {} stopped", addr);
        });

        conn
    }

    /// Run a single session over an already established stream, without reconnecting
    pub fn attach<S>(address: impl Into<String>, stream: S, config: &BridgeConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Self::new(address.into(), config);
        let shared = conn.shared.clone();
        tokio::spawn(async move {
            run_session(&shared, stream).await;
        });
        conn
    }

    /// Receiver address this connection talks to
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> LinkState {
        *self.shared.link_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.link_tx.subscribe()
    }

    /// Subscribe to classified inbound messages
    pub fn subscribe(&self) -> broadcast::Receiver<AvrMessage> {
        self.shared.messages_tx.subscribe()
    }

    /// Queue a command for the receiver
    pub async fn send(&self, command: &AvrCommand) -> Result<()> {
        let writer = self.shared.writer.lock().await;
        let writer = writer.as_ref().ok_or(BridgeError::NotConnected)?;
        let line = command.encode();
        tracing::debug!("Sending to receiver: {}", line);

        writer.send(line).map_err(|_| BridgeError::NotConnected)
    }

    /// Queue several commands in order
    pub async fn send_all(&self, commands: &[AvrCommand]) -> Result<()> {
        for command in commands {
            self.send(command).await?;
        }
        Ok(())
    }

    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }
}

impl Drop for AvrConnection {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run_session<S>(shared: &Arc<Shared>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sink, mut lines) = Framed::new(stream, AvrLineCodec).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    *shared.writer.lock().await = Some(tx);
    // Nothing to re-register: the receiver pushes state changes unsolicited
    shared.link_tx.send_replace(LinkState::Resubscribing);
    shared.link_tx.send_replace(LinkState::Connected);

    let write_loop = async {
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::error!("Failed to send receiver command: {}", e);
                break;
            }
            if !shared.spacing.is_zero() {
                sleep(shared.spacing).await;
            }
        }
    };

    let read_loop = async {
        while let Some(item) = lines.next().await {
            match item {
                Ok(line) => {
                    tracing::debug!("Received from receiver: {}", line);
                    match parse_line(&line) {
                        AvrMessage::Unknown(line) => {
                            tracing::debug!("Ignoring unrecognized receiver line: {}", line);
                        }
                        message => {
                            let _ = shared.messages_tx.send(message);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Receiver read error: {}", e);
                    break;
                }
            }
        }
        tracing::info!("Receiver connection closed");
    };

    tokio::select! {
        _ = write_loop => {}
        _ = read_loop => {}
        _ = shared.shutdown.cancelled() => {
            tracing::debug!("Receiver session cancelled");
        }
    }

    *shared.writer.lock().await = None;
    shared.link_tx.send_replace(LinkState::Disconnected);
}
