//! Worker WebSocket channel implementation
//!
//! This module provides a WebSocket-based control channel to the worker process.

use super::traits::{WorkerChannel, WorkerConnector, WorkerEvent};
use super::types::*;
use crate::service::ServiceState;
use crate::Error;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, PendingCommand>>>;
type EventSlot = Arc<Mutex<Option<mpsc::Sender<WorkerEvent>>>>;

/// Capacity of the pushed-event queue
const EVENT_QUEUE_CAPACITY: usize = 100;

/// Pending command response
#[derive(Debug)]
struct PendingCommand {
    /// Response channel sender
    sender: oneshot::Sender<WorkerRpcResponse>,
    /// Command method (for logging)
    method: String,
}

/// Worker WebSocket channel implementation
pub struct WsWorkerChannel {
    /// WebSocket URL
    url: String,
    /// Write half of the socket
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    /// Next command ID
    next_id: AtomicU64,
    /// Pending commands (ID -> response sender)
    pending: PendingMap,
    /// Registered event sink, at most one
    events: EventSlot,
    /// Is channel active
    is_active: Arc<AtomicBool>,
    /// Per-command timeout
    command_timeout: Duration,
    /// Read loop task
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WsWorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsWorkerChannel")
            .field("url", &self.url)
            .field("is_active", &self.is_active.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for WsWorkerChannel {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

impl WsWorkerChannel {
    /// Connect to the worker control endpoint
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://127.0.0.1:1090")
    /// * `command_timeout` - bound on the handshake and on every command
    pub async fn connect<S: Into<String>>(url: S, command_timeout: Duration) -> Result<Arc<Self>, Error> {
        let url = url.into();
        info!("Connecting to worker control channel: {}", url);

        let (ws_stream, _) = tokio::time::timeout(command_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::timeout(format!("Bind to {} timed out", url)))?
            .map_err(|e| Error::websocket(format!("Failed to connect: {}", e)))?;

        let (sink, stream) = ws_stream.split();

        let channel = Arc::new(Self {
            url,
            sink: Mutex::new(Some(sink)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(None)),
            is_active: Arc::new(AtomicBool::new(true)),
            command_timeout,
            reader: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(Self::message_loop(
            stream,
            Arc::clone(&channel.pending),
            Arc::clone(&channel.events),
            Arc::clone(&channel.is_active),
        ));
        if let Ok(mut reader) = channel.reader.lock() {
            *reader = Some(handle);
        }

        info!("Worker control channel established");
        Ok(channel)
    }

    /// Read loop; ends when the socket closes or errors
    async fn message_loop(
        mut stream: SplitStream<WsStream>,
        pending: PendingMap,
        events: EventSlot,
        is_active: Arc<AtomicBool>,
    ) {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => Self::handle_text(&text, &pending, &events).await,
                Ok(Message::Close(_)) => {
                    info!("Worker sent close frame");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Worker channel error: {}", e);
                    break;
                }
            }
        }

        is_active.store(false, Ordering::SeqCst);
        // ends the event receiver, which is how observers learn about the death
        events.lock().await.take();
        // dropping the senders fails every waiter
        pending.lock().await.clear();
        info!("Worker channel read loop exited");
    }

    /// Route one text frame to a waiter or to the event sink
    async fn handle_text(text: &str, pending: &PendingMap, events: &EventSlot) {
        if let Ok(response) = serde_json::from_str::<WorkerRpcResponse>(text) {
            match pending.lock().await.remove(&response.id) {
                Some(command) => {
                    debug!("Received response for command {}: {}", response.id, command.method);
                    let _ = command.sender.send(response);
                }
                None => warn!("Received response for unknown command ID: {}", response.id),
            }
            return;
        }

        let notification = match serde_json::from_str::<WorkerNotification>(text) {
            Ok(notification) => notification,
            Err(_) => {
                warn!("Unknown message format: {}", text);
                return;
            }
        };

        let event = match notification.into_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Ignoring unknown worker event");
                return;
            }
            Err(e) => {
                warn!("Malformed worker event: {}", e);
                return;
            }
        };

        let sender = events.lock().await.clone();
        if let Some(sender) = sender {
            if sender.send(event).await.is_err() {
                debug!("Event receiver dropped, clearing registration");
                events.lock().await.take();
            }
        }
    }

    /// Send a command and wait for its result
    async fn send_command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, Error> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Err(Error::channel("Worker channel is not active"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = WorkerRequest {
            id,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&request)?;
        debug!("Sending worker command {}: {}", id, method);

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingCommand {
                sender,
                method: method.to_string(),
            },
        );

        if let Err(e) = self.send_message(Message::Text(json)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, receiver).await {
            Ok(Ok(response)) => match response.error {
                Some(error) => Err(Error::channel(format!(
                    "{} failed: {} (code: {})",
                    method, error.message, error.code
                ))),
                None => Ok(response.result),
            },
            Ok(Err(_)) => Err(Error::channel(format!(
                "Worker channel closed before {} completed",
                method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::timeout(format!("Command {} ({}) timed out", id, method)))
            }
        }
    }

    /// Send WebSocket message
    async fn send_message(&self, message: Message) -> Result<(), Error> {
        let mut sink = self.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or_else(|| Error::channel("Worker channel is closed"))?;

        sink.send(message)
            .await
            .map_err(|e| Error::websocket(format!("Failed to send message: {}", e)))
    }
}

#[async_trait]
impl WorkerChannel for WsWorkerChannel {
    async fn start(&self) -> Result<(), Error> {
        self.send_command(methods::START, None).await.map(|_| ())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.send_command(methods::STOP, None).await.map(|_| ())
    }

    async fn reload(&self) -> Result<(), Error> {
        self.send_command(methods::RELOAD, None).await.map(|_| ())
    }

    async fn query_state(&self) -> Result<ServiceState, Error> {
        let result = self.send_command(methods::QUERY_STATE, None).await?;
        let result: StateResult = serde_json::from_value(result)?;
        Ok(result.state)
    }

    async fn register_callback(&self) -> Result<mpsc::Receiver<WorkerEvent>, Error> {
        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        // installed first so events pushed right after the reply are not lost
        *self.events.lock().await = Some(sender);

        if let Err(e) = self.send_command(methods::REGISTER_CALLBACK, None).await {
            self.events.lock().await.take();
            return Err(e);
        }
        Ok(receiver)
    }

    async fn unregister_callback(&self) -> Result<(), Error> {
        let result = self.send_command(methods::UNREGISTER_CALLBACK, None).await;
        self.events.lock().await.take();
        result.map(|_| ())
    }

    async fn start_listening_for_bandwidth(&self, interval_ms: u64) -> Result<(), Error> {
        let params = serde_json::to_value(BandwidthParams { interval_ms })?;
        self.send_command(methods::START_BANDWIDTH, Some(params))
            .await
            .map(|_| ())
    }

    async fn stop_listening_for_bandwidth(&self) -> Result<(), Error> {
        self.send_command(methods::STOP_BANDWIDTH, None).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), Error> {
        info!("Closing worker control channel");
        self.is_active.store(false, Ordering::SeqCst);

        let close_result = match self.sink.lock().await.take() {
            Some(mut sink) => sink
                .close()
                .await
                .map_err(|e| Error::websocket(format!("Failed to close WebSocket: {}", e))),
            None => Ok(()),
        };

        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
        self.events.lock().await.take();
        self.pending.lock().await.clear();

        close_result
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

/// Binds [`WsWorkerChannel`]s to a fixed endpoint
#[derive(Debug, Clone)]
pub struct WsWorkerConnector {
    endpoint: String,
    command_timeout: Duration,
}

impl WsWorkerConnector {
    /// Create a connector for `endpoint`
    pub fn new<S: Into<String>>(endpoint: S, command_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            command_timeout,
        }
    }

    /// Endpoint this connector binds to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WorkerConnector for WsWorkerConnector {
    async fn bind(&self) -> Result<Arc<dyn WorkerChannel>, Error> {
        let channel = WsWorkerChannel::connect(self.endpoint.clone(), self.command_timeout).await?;
        Ok(channel as Arc<dyn WorkerChannel>)
    }
}
