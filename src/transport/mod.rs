//! Real-time channel to the relay and its reconnect state machine.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{select, sync::mpsc, task::JoinHandle, time};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::protocol::{self, ControlFrame, InboundMessage};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
}

// `generation` identifies the emitting socket.
#[derive(Debug)]
pub enum TransportEvent {
    Opened { generation: u64 },
    Message { generation: u64, message: InboundMessage },
    Closed { generation: u64, reason: Option<String> },
    Failed { generation: u64, error: TransportError },
    ReconnectDue,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug)]
pub struct TransportChannel {
    config: ChannelConfig,
    state: ConnectionState,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    socket_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl TransportChannel {
    pub fn new(config: ChannelConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            generation: 0,
            events,
            outbound: None,
            socket_task: None,
            reconnect_timer: None,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn connect(&mut self) {
        if self.torn_down {
            return;
        }
        self.close_socket();

        self.generation += 1;
        self.state = ConnectionState::Connecting;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        self.socket_task = Some(tokio::spawn(run_socket(
            self.config.url.clone(),
            self.generation,
            self.events.clone(),
            outbound_rx,
        )));

        debug!(url = %self.config.url, generation = self.generation, "connecting");
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Option<InboundMessage> {
        if self.torn_down {
            return None;
        }

        match event {
            TransportEvent::Opened { generation } if generation == self.generation => {
                info!(url = %self.config.url, "real-time channel connected");
                self.state = ConnectionState::Connected;
                self.cancel_reconnect();
                None
            }
            TransportEvent::Message {
                generation,
                message,
            } if generation == self.generation => Some(message),
            TransportEvent::Closed { generation, reason } if generation == self.generation => {
                info!(reason = reason.as_deref().unwrap_or("none"), "real-time channel closed");
                self.mark_disconnected();
                None
            }
            TransportEvent::Failed { generation, error } if generation == self.generation => {
                warn!(%error, "real-time channel error");
                self.mark_disconnected();
                None
            }
            TransportEvent::ReconnectDue => {
                self.reconnect_timer = None;
                if self.state == ConnectionState::Disconnected {
                    debug!("attempting reconnect");
                    self.connect();
                }
                None
            }
            stale => {
                debug!(?stale, "ignoring event from superseded socket");
                None
            }
        }
    }

    pub fn schedule_reconnect(&mut self) -> bool {
        if self.torn_down || self.reconnect_timer.is_some() {
            return false;
        }

        let events = self.events.clone();
        let delay = self.config.reconnect_delay;
        self.reconnect_timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(TransportEvent::ReconnectDue);
        }));

        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        true
    }

    pub fn send_refresh_request(&self) -> bool {
        if !self.is_open() {
            return false;
        }

        let Some(outbound) = &self.outbound else {
            return false;
        };

        match protocol::encode_control(ControlFrame::Refresh) {
            Ok(text) => outbound.send(Message::Text(text)).is_ok(),
            Err(err) => {
                warn!(?err, "failed to encode refresh frame");
                false
            }
        }
    }

    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.cancel_reconnect();
        self.close_socket();
        self.state = ConnectionState::Disconnected;
        debug!("real-time channel shut down");
    }

    fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.outbound = None;
        self.socket_task = None;
        self.schedule_reconnect();
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn close_socket(&mut self) {
        self.outbound = None;
        if let Some(task) = self.socket_task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.cancel_reconnect();
        self.close_socket();
    }
}

async fn run_socket(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            let _ = events.send(TransportEvent::Failed {
                generation,
                error: TransportError::Connect(err.to_string()),
            });
            return;
        }
    };

    if events.send(TransportEvent::Opened { generation }).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();

    loop {
        select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match protocol::decode_frame(&text) {
                    Ok(message) => {
                        debug!(kind = ?message.kind, "frame received");
                        if events.send(TransportEvent::Message { generation, message }).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(%err, "dropping malformed frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    let _ = events.send(TransportEvent::Closed { generation, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events.send(TransportEvent::Failed {
                        generation,
                        error: TransportError::Socket(err.to_string()),
                    });
                    return;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed { generation, reason: None });
                    return;
                }
            },
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    if let Err(err) = write.send(message).await {
                        let _ = events.send(TransportEvent::Failed {
                            generation,
                            error: TransportError::Socket(err.to_string()),
                        });
                        return;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            }
        }
    }
}
