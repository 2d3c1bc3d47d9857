//! Common test utilities
//!
//! In-process fakes for the worker control channel and for subscription
//! feeds, plus document builders.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use veilsync::service::{can_start, can_stop, ServiceState};
use veilsync::subscription::document::encode_base64;
use veilsync::subscription::Profile;

/// Name the fake worker reports for its active profile
pub const FAKE_PROFILE: &str = "fake";

struct Peer {
    outbound: mpsc::UnboundedSender<String>,
    kill: Arc<Notify>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<Option<ServiceState>>,
    fail_next_start: Mutex<Option<String>>,
    current: Mutex<Option<Peer>>,
    connections: AtomicUsize,
    open_connections: AtomicUsize,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
    bandwidth_interval: AtomicU64,
}

impl Shared {
    async fn state(&self) -> ServiceState {
        self.state.lock().await.unwrap_or(ServiceState::Idle)
    }
}

/// Fake worker speaking the JSON control protocol over WebSocket
pub struct FakeWorker {
    endpoint: String,
    shared: Arc<Shared>,
    accept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FakeWorker {
    /// Start listening on an ephemeral port
    pub async fn start(initial: ServiceState) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = format!("ws://{}", listener.local_addr()?);
        let shared = Arc::new(Shared::default());
        *shared.state.lock().await = Some(initial);

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(Self::serve(accept_shared.clone(), stream));
            }
        });

        Ok(Self {
            endpoint,
            shared,
            accept_task: std::sync::Mutex::new(Some(accept_task)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn state(&self) -> ServiceState {
        self.shared.state().await
    }

    pub async fn set_state(&self, state: ServiceState) {
        *self.shared.state.lock().await = Some(state);
    }

    /// Make the next start fail with `message`
    pub async fn fail_next_start(&self, message: &str) {
        *self.shared.fail_next_start.lock().await = Some(message.to_string());
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Sockets the worker is still serving
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        self.shared.registrations.load(Ordering::SeqCst)
    }

    pub fn unregistrations(&self) -> usize {
        self.shared.unregistrations.load(Ordering::SeqCst)
    }

    pub fn bandwidth_interval(&self) -> u64 {
        self.shared.bandwidth_interval.load(Ordering::SeqCst)
    }

    /// Push a traffic sample to the connected client
    pub async fn push_traffic(&self, profile_id: i64, tx_rate: u64, rx_rate: u64) -> bool {
        let notification = json!({
            "method": "trafficUpdated",
            "params": {
                "profileId": profile_id,
                "txRate": tx_rate,
                "rxRate": rx_rate,
                "txTotal": tx_rate * 10,
                "rxTotal": rx_rate * 10,
            }
        });
        Self::push(&self.shared, notification).await
    }

    /// Drop the current connection without a close frame
    pub async fn crash(&self) {
        if let Some(peer) = self.shared.current.lock().await.take() {
            peer.kill.notify_one();
        }
    }

    /// Stop accepting and drop the current connection
    pub async fn shutdown(&self) {
        let accept_task = self.accept_task.lock().unwrap().take();
        if let Some(task) = accept_task {
            task.abort();
            // listener is closed once the task is gone
            let _ = task.await;
        }
        self.crash().await;
    }

    async fn push(shared: &Shared, notification: Value) -> bool {
        match shared.current.lock().await.as_ref() {
            Some(peer) => peer.outbound.send(notification.to_string()).is_ok(),
            None => false,
        }
    }

    async fn transition(shared: &Shared, state: ServiceState, message: Option<&str>) {
        *shared.state.lock().await = Some(state);
        let mut params = json!({ "state": state, "profileName": FAKE_PROFILE });
        if let Some(message) = message {
            params["message"] = json!(message);
        }
        Self::push(shared, json!({ "method": "stateChanged", "params": params })).await;
    }

    async fn serve(shared: Arc<Shared>, stream: TcpStream) {
        let Ok(ws) = accept_async(stream).await else {
            return;
        };
        shared.open_connections.fetch_add(1, Ordering::SeqCst);
        let (mut sink, mut source) = ws.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
        let kill = Arc::new(Notify::new());
        *shared.current.lock().await = Some(Peer {
            outbound: outbound.clone(),
            kill: kill.clone(),
        });

        loop {
            tokio::select! {
                _ = kill.notified() => break,
                Some(text) = queue.recv() => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(request) = serde_json::from_str::<Value>(&text) {
                            let reply = Self::handle(&shared, &request).await;
                            let _ = outbound.send(reply.to_string());
                            Self::after(&shared, &request).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                },
            }
        }
        shared.open_connections.fetch_sub(1, Ordering::SeqCst);
    }

    async fn handle(shared: &Shared, request: &Value) -> Value {
        let id = request.get("id").and_then(Value::as_u64).unwrap_or(0);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

        match method {
            "queryState" => json!({ "id": id, "result": { "state": shared.state().await } }),
            "registerCallback" => {
                shared.registrations.fetch_add(1, Ordering::SeqCst);
                json!({ "id": id, "result": null })
            }
            "unregisterCallback" => {
                shared.unregistrations.fetch_add(1, Ordering::SeqCst);
                json!({ "id": id, "result": null })
            }
            "startListeningForBandwidth" => {
                let interval = request
                    .pointer("/params/intervalMs")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                shared.bandwidth_interval.store(interval, Ordering::SeqCst);
                json!({ "id": id, "result": null })
            }
            "stopListeningForBandwidth" => {
                shared.bandwidth_interval.store(0, Ordering::SeqCst);
                json!({ "id": id, "result": null })
            }
            "start" | "stop" | "reload" => json!({ "id": id, "result": null }),
            other => json!({
                "id": id,
                "error": { "code": -32601, "message": format!("Method not implemented: {}", other) }
            }),
        }
    }

    /// Transitions pushed after a command is acknowledged
    async fn after(shared: &Shared, request: &Value) {
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let state = shared.state().await;

        match method {
            "start" if can_start(state) => {
                Self::transition(shared, ServiceState::Connecting, None).await;
                let failure = shared.fail_next_start.lock().await.take();
                match failure {
                    Some(message) => {
                        Self::transition(shared, ServiceState::Stopped, Some(&message)).await
                    }
                    None => Self::transition(shared, ServiceState::Connected, None).await,
                }
            }
            "stop" if can_stop(state) => {
                Self::transition(shared, ServiceState::Stopping, None).await;
                Self::transition(shared, ServiceState::Idle, None).await;
            }
            _ => {}
        }
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Minimal HTTP server serving fixed bodies by path
pub struct FeedServer {
    base: String,
    routes: Arc<std::sync::Mutex<HashMap<String, (u16, String)>>>,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FeedServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        let routes: Arc<std::sync::Mutex<HashMap<String, (u16, String)>>> = Arc::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let (task_routes, task_hits) = (routes.clone(), hits.clone());
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                task_hits.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(Self::respond(task_routes.clone(), stream));
            }
        });

        Ok(Self {
            base,
            routes,
            hits,
            task,
        })
    }

    /// Serve `body` with status 200 at `path`, returning the full URL
    pub fn serve(&self, path: &str, body: impl Into<String>) -> String {
        self.serve_status(path, 200, body)
    }

    pub fn serve_status(&self, path: &str, status: u16, body: impl Into<String>) -> String {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.into()));
        self.url(path)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn respond(
        routes: Arc<std::sync::Mutex<HashMap<String, (u16, String)>>>,
        mut stream: TcpStream,
    ) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let head = String::from_utf8_lossy(&request);
        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
        let (status, body) = routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or((404, "not found".to_string()));

        let response = format!(
            "HTTP/1.1 {} X\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Profile for `host` labelled with `group`
pub fn server(host: &str, group: &str) -> Profile {
    Profile {
        name: host.to_string(),
        group: group.to_string(),
        host: host.to_string(),
        remote_port: 443,
        password: "secret".to_string(),
        method: "chacha20-ietf".to_string(),
        protocol: "auth_aes128_md5".to_string(),
        obfs: "tls1.2_ticket_auth".to_string(),
        ..Default::default()
    }
}

/// Base64 feed body for `servers`, optionally headed by a raw `MAX=` line
pub fn feed_body(servers: &[Profile], max: Option<usize>) -> String {
    let uris = servers
        .iter()
        .map(Profile::to_uri)
        .collect::<Vec<_>>()
        .join("\n");
    let payload = encode_base64(uris.as_bytes());
    match max {
        Some(max) => format!("MAX={}\n{}", max, payload),
        None => payload,
    }
}
