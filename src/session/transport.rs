//! # Remote Streaming Transport
//!
//! Connects to the remote conversational endpoint and exposes the session as
//! two channels:
//!
//! - **outbound**: `EncodedChunk`s from the capture pipeline, written as
//!   `realtimeInput` messages in capture order
//! - **events**: typed `ServerEvent`s (`Open`, `Audio`, `Close`, `Error`) in
//!   arrival order
//!
//! The session lifecycle only ever talks to `RealtimeConnector`, so tests can
//! swap the WebSocket for an in-memory remote.
//!
//! ## Task Layout:
//! ```text
//! connect_async ─┬─ writer task: outbound rx → JSON text frames → socket
//!                └─ reader task: socket → ServerMessage → events tx
//! ```

use crate::audio::codec::EncodedChunk;
use crate::error::VoiceError;
use crate::session::instruction::Voice;
use crate::session::protocol::{Blob, ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

/// Capacity of the inbound event queue.
const EVENT_QUEUE: usize = 256;

/// Everything the remote endpoint needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: Voice,
    pub system_instruction: String,
}

/// Lifecycle and data events coming back from the remote endpoint.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The endpoint acknowledged the session
    Open,
    /// One base64 speech fragment
    Audio(Blob),
    /// The endpoint closed the session, with its reason if it gave one
    Close(Option<String>),
    /// The transport failed
    Error(String),
}

/// A live connection: an outbound sink and an inbound event source.
pub struct RealtimeConnection {
    pub outbound: mpsc::Sender<EncodedChunk>,
    pub events: mpsc::Receiver<ServerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RealtimeConnection {
    pub fn new(
        outbound: mpsc::Sender<EncodedChunk>,
        events: mpsc::Receiver<ServerEvent>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            outbound,
            events,
            shutdown: Some(shutdown),
        }
    }

    /// Ask the writer to close the socket. Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens connections to the remote endpoint.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Perform the handshake and send the setup message.
    ///
    /// Returning `Ok` does not mean the session is open; that is signalled by
    /// a `ServerEvent::Open` on the event channel.
    async fn connect(
        &self,
        setup: SessionSetup,
        outbound_capacity: usize,
    ) -> Result<RealtimeConnection, VoiceError>;
}

/// `RealtimeConnector` over a WebSocket (`tokio-tungstenite`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint_url: String,
    api_key: Option<String>,
}

impl WebSocketConnector {
    pub fn new(endpoint_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            api_key,
        }
    }

    fn request_url(&self) -> Result<String, VoiceError> {
        match self.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
            Some(key) => {
                let separator = if self.endpoint_url.contains('?') { '&' } else { '?' };
                Ok(format!("{}{}key={}", self.endpoint_url, separator, key))
            }
            None => Err(VoiceError::Connection(
                "no API key configured for the streaming endpoint".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(
        &self,
        setup: SessionSetup,
        outbound_capacity: usize,
    ) -> Result<RealtimeConnection, VoiceError> {
        let url = self.request_url()?;
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| VoiceError::Connection(format!("handshake failed: {}", e)))?;
        info!(model = %setup.model, voice = %setup.voice, "Connected to streaming endpoint");

        let (mut write, mut read) = socket.split();

        let setup_message = serde_json::to_string(&ClientMessage::setup(
            &setup.model,
            setup.voice,
            &setup.system_instruction,
        ))
        .map_err(|e| VoiceError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(setup_message))
            .await
            .map_err(|e| VoiceError::Connection(format!("failed to send setup: {}", e)))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<EncodedChunk>(outbound_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_QUEUE);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        // Writer: frames go out in the order they were captured
        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = outbound_rx.recv() => {
                        let Some(chunk) = chunk else { break };
                        let text = match serde_json::to_string(&ClientMessage::media(&chunk)) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize capture frame");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text)).await {
                            let _ = writer_events.send(ServerEvent::Error(format!("send failed: {}", e))).await;
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            let _ = write.close().await;
            debug!("Streaming writer stopped");
        });

        // Reader: every server message becomes zero or more events
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => server_event(&text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => server_event(&text),
                        Err(_) => {
                            debug!("Ignoring non-UTF-8 binary message");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                        let _ = event_tx.send(ServerEvent::Close(reason)).await;
                        return;
                    }
                    Ok(_) => None,
                    Err(e) => {
                        let _ = event_tx.send(ServerEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                if let Some(event) = event {
                    if event_tx.send(event).await.is_err() {
                        // Session gone
                        return;
                    }
                }
            }
            let _ = event_tx.send(ServerEvent::Close(None)).await;
        });

        Ok(RealtimeConnection::new(outbound_tx, event_rx, shutdown_tx))
    }
}

/// Map one raw server message onto a session event.
fn server_event(raw: &str) -> Option<ServerEvent> {
    let message = match ServerMessage::parse(raw) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable server message");
            return None;
        }
    };

    if message.setup_complete.is_some() {
        return Some(ServerEvent::Open);
    }
    if message.go_away.is_some() {
        warn!("Streaming endpoint announced it will disconnect soon");
    }
    if let Some(content) = &message.server_content {
        if content.interrupted == Some(true) {
            debug!("Model turn interrupted by user speech");
        }
        if content.turn_complete == Some(true) {
            trace!("Model turn complete");
        }
        if let Some(turn) = &content.model_turn {
            for text in turn.parts.iter().filter_map(|part| part.text.as_deref()) {
                debug!(text, "Model text part");
            }
        }
    }
    message.audio().cloned().map(ServerEvent::Audio)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// The far side of a `MockConnector` connection.
    pub struct MockRemote {
        pub setup: SessionSetup,
        pub sent: mpsc::Receiver<EncodedChunk>,
        pub events: mpsc::Sender<ServerEvent>,
        pub shutdown: oneshot::Receiver<()>,
    }

    #[derive(Clone, Copy, PartialEq)]
    pub enum ConnectBehavior {
        /// Connect and acknowledge straight away
        OpenImmediately,
        /// Connect but wait for the test to send `Open`
        Silent,
        /// Refuse the handshake
        Refuse,
        /// Never finish the handshake
        Hang,
    }

    #[derive(Clone)]
    pub struct MockConnector {
        pub behavior: ConnectBehavior,
        pub remote: Arc<Mutex<Option<MockRemote>>>,
    }

    impl MockConnector {
        pub fn new(behavior: ConnectBehavior) -> Self {
            Self {
                behavior,
                remote: Arc::new(Mutex::new(None)),
            }
        }

        pub fn take_remote(&self) -> Option<MockRemote> {
            self.remote.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl RealtimeConnector for MockConnector {
        async fn connect(
            &self,
            setup: SessionSetup,
            outbound_capacity: usize,
        ) -> Result<RealtimeConnection, VoiceError> {
            match self.behavior {
                ConnectBehavior::Refuse => {
                    return Err(VoiceError::Connection("handshake refused".to_string()))
                }
                ConnectBehavior::Hang => std::future::pending::<()>().await,
                _ => {}
            }

            let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
            let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
            let (shutdown_tx, shutdown_rx) = oneshot::channel();

            if self.behavior == ConnectBehavior::OpenImmediately {
                let _ = event_tx.send(ServerEvent::Open).await;
            }

            *self.remote.lock().unwrap() = Some(MockRemote {
                setup,
                sent: outbound_rx,
                events: event_tx,
                shutdown: shutdown_rx,
            });
            Ok(RealtimeConnection::new(outbound_tx, event_rx, shutdown_tx))
        }
    }
}
