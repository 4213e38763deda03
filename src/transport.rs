//! Push channel transport and its supervisor
//!
//! The supervisor task owns the [`ConnectionStateMachine`]: it opens the
//! channel, forwards decoded snapshots, reconnects with backoff on error or
//! close, and exits (closing the channel) when its command sender is dropped.

use crate::config::LobbyConfig;
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::error::{LobbyError, Result};
use crate::types::{LobbySnapshot, PushMessage};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// One open push connection
#[async_trait]
pub trait PushChannel: Send {
    /// Next text frame. `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

/// Opens push connections for a lobby
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, join_code: &str) -> Result<Box<dyn PushChannel>>;
}

/// WebSocket push transport
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: LobbyConfig,
}

impl WebSocketTransport {
    pub fn new(config: &LobbyConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn open(&self, join_code: &str) -> Result<Box<dyn PushChannel>> {
        let url = self.config.resolve_push_url(join_code);
        debug!("Opening push channel: {}", url);
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LobbyError::Transport(e.to_string()))?;
        Ok(Box::new(WebSocketChannel { stream }))
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushChannel for WebSocketChannel {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Push channel closed by server: {:?}", frame);
                    return None;
                }
                // Control frames are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(LobbyError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Push channel close: {}", e);
        }
    }
}

/// Decoded push frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Snapshot(LobbySnapshot),
    KeepAlive,
}

/// Decode one push frame. Anything that is not a known message is dropped.
pub fn decode_frame(text: &str) -> Option<Frame> {
    match serde_json::from_str::<PushMessage>(text) {
        Ok(PushMessage::Ping) => Some(Frame::KeepAlive),
        Ok(message) => message.into_snapshot().map(Frame::Snapshot),
        Err(e) => {
            warn!("Ignoring unexpected push payload: {}", e);
            None
        }
    }
}

#[derive(Debug)]
pub(crate) enum PushCommand {
    Reconnect,
}

enum ReadOutcome {
    Dropped,
    Reconnect,
    Shutdown,
}

/// Drive the push channel until the command sender is dropped.
pub(crate) async fn push_supervisor(
    transport: Arc<dyn PushTransport>,
    join_code: String,
    mut machine: ConnectionStateMachine,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: mpsc::UnboundedSender<LobbySnapshot>,
    mut cmd_rx: mpsc::UnboundedReceiver<PushCommand>,
) {
    let publish = |machine: &ConnectionStateMachine| {
        state_tx.send_replace(machine.state());
    };

    loop {
        machine.begin_connect();
        publish(&machine);

        let opened = tokio::select! {
            opened = transport.open(&join_code) => opened,
            cmd = cmd_rx.recv() => match cmd {
                Some(PushCommand::Reconnect) => {
                    machine.reconnect();
                    continue;
                }
                None => break,
            },
        };

        match opened {
            Ok(mut channel) => {
                let outcome = loop {
                    tokio::select! {
                        frame = channel.recv() => match frame {
                            Some(Ok(text)) => {
                                if machine.on_frame() {
                                    info!("Push channel live for {}", join_code);
                                    publish(&machine);
                                }
                                if let Some(Frame::Snapshot(snapshot)) = decode_frame(&text) {
                                    if snapshot_tx.send(snapshot).is_err() {
                                        break ReadOutcome::Shutdown;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                warn!("Push channel error: {}", e);
                                break ReadOutcome::Dropped;
                            }
                            None => {
                                debug!("Push channel closed");
                                break ReadOutcome::Dropped;
                            }
                        },
                        cmd = cmd_rx.recv() => match cmd {
                            Some(PushCommand::Reconnect) => break ReadOutcome::Reconnect,
                            None => break ReadOutcome::Shutdown,
                        },
                    }
                };

                match outcome {
                    ReadOutcome::Dropped => {}
                    ReadOutcome::Reconnect => {
                        channel.close().await;
                        machine.reconnect();
                        continue;
                    }
                    ReadOutcome::Shutdown => {
                        channel.close().await;
                        break;
                    }
                }
            }
            Err(e) => warn!("Push channel open failed: {}", e),
        }

        let delay = machine.on_disconnect();
        publish(&machine);
        debug!("Reconnecting push channel in {:?}", delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = cmd_rx.recv() => match cmd {
                Some(PushCommand::Reconnect) => machine.reconnect(),
                None => break,
            },
        }
    }

    state_tx.send_replace(ConnectionState::Disconnected);
    debug!("Push supervisor for {} exited", join_code);
}
