//! Realtime hub client: one logical connection per device.
//!
//! Provides:
//! - Idempotent connect (concurrent callers share one attempt and its outcome)
//! - Automatic reconnection with backoff, token re-fetched on every attempt
//! - Topic subscriptions that outlive individual sockets
//! - Group membership, re-joined after every reconnect
//! - Request/response invocations that fail loudly when the socket drops
//!
//! ```text
//!             connect()                     socket lost
//! Disconnected ────────► Connecting ──► Connected ─────► Reconnecting
//!      ▲                     │   ▲                           │
//!      │  attempts exhausted │   └───────────────────────────┘
//!      └─────────────────────┴───── disconnect() / close ◄───┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::{SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::auth::TokenProvider;
use crate::config::HubConfig;
use crate::error::ChannelError;
use crate::hub::protocol::{self, HubMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingReply = oneshot::Sender<Result<Value, ChannelError>>;

/// Frames buffered towards the socket writer.
const OUTGOING_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Why a live socket stopped.
enum SessionEnd {
    /// `disconnect()` or the client was dropped.
    Shutdown,
    /// Transport dropped; reconnect.
    Lost(String),
    /// Server closed and did not allow reconnecting.
    Closed(String),
}

/// State shared between the handle and the connection driver task.
struct Shared {
    config: HubConfig,
    tokens: Arc<dyn TokenProvider>,
    state: watch::Sender<ConnectionState>,
    /// Reason of the last terminal failure, reported to `connect()` waiters.
    last_error: StdMutex<Option<ChannelError>>,
    /// Topic (lower-cased) → live subscribers.
    topics: StdMutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    /// Invocation id → (method, reply).
    pending: Mutex<HashMap<String, (String, PendingReply)>>,
    /// Writer of the current socket, `None` while not connected.
    outgoing: RwLock<Option<mpsc::Sender<String>>>,
    /// Groups to re-join after a reconnect.
    groups: Mutex<BTreeSet<String>>,
    next_invocation: AtomicU64,
}

struct Control {
    driver: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// The realtime channel client.
pub struct HubClient {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

/// Every future occurrence of one pushed topic, decoded as `T`.
///
/// Registration is immediate and survives reconnects; items only arrive
/// while a connection is live. Payloads that do not decode as `T` are
/// logged and skipped.
pub struct Subscription<T> {
    topic: String,
    rx: mpsc::UnboundedReceiver<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl<T: DeserializeOwned> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            match std::task::ready!(self.rx.poll_recv(cx)) {
                Some(value) => match serde_json::from_value::<T>(value) {
                    Ok(item) => return Poll::Ready(Some(item)),
                    Err(e) => log::warn!("Invalid payload on topic {}: {e}", self.topic),
                },
                None => return Poll::Ready(None),
            }
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn topic_key(topic: &str) -> String {
    topic.to_ascii_lowercase()
}

impl HubClient {
    /// Create a client. Nothing is opened until [`HubClient::connect`].
    pub fn new(config: HubConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                tokens,
                state,
                last_error: StdMutex::new(None),
                topics: StdMutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                outgoing: RwLock::new(None),
                groups: Mutex::new(BTreeSet::new()),
                next_invocation: AtomicU64::new(1),
            }),
            control: Mutex::new(Control {
                driver: None,
                shutdown: None,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Connect, or wait for the attempt already in flight.
    ///
    /// Resolves once connected. Fails with [`ChannelError::Connection`] only
    /// when the reconnect policy gives up (or the server refuses to let the
    /// client reconnect); individual failed attempts are retried silently.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut state_rx = {
            let mut control = self.control.lock().await;
            if self.state() == ConnectionState::Disconnected {
                self.spawn_driver(&mut control);
            }
            self.shared.state.subscribe()
        };

        let settled = state_rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
            .map(|s| *s)
            .map_err(|_| ChannelError::Connection("client dropped".into()))?;

        match settled {
            ConnectionState::Connected => Ok(()),
            _ => Err(lock(&self.shared.last_error)
                .clone()
                .unwrap_or_else(|| ChannelError::Connection("connection closed".into()))),
        }
    }

    /// Tear the connection down. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let mut control = self.control.lock().await;
        let Some(driver) = control.driver.take() else {
            return;
        };
        if let Some(shutdown) = control.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = driver.await {
            if !e.is_cancelled() {
                log::error!("Hub connection task failed: {e}");
            }
        }
        log::info!("Hub connection stopped");
    }

    /// Register interest in a pushed topic. Never fails.
    pub fn subscribe<T: DeserializeOwned>(&self, topic: &str) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.topics)
            .entry(topic_key(topic))
            .or_default()
            .push(tx);
        Subscription {
            topic: topic.to_string(),
            rx,
            _marker: PhantomData,
        }
    }

    /// Add this connection to a server-side group.
    ///
    /// Connects first when needed. The group is re-joined automatically
    /// after every reconnect until [`HubClient::forget_group`].
    pub async fn join_group(&self, group: &str) -> Result<(), ChannelError> {
        let join_error = |reason: String| ChannelError::GroupJoin {
            group: group.to_string(),
            reason,
        };

        self.ensure_connected()
            .await
            .map_err(|e| join_error(e.to_string()))?;
        self.shared
            .invoke_value(
                &self.shared.config.join_group_method,
                vec![Value::String(group.to_string())],
            )
            .await
            .map_err(|e| join_error(e.to_string()))?;

        self.shared.groups.lock().await.insert(group.to_string());
        log::info!("Joined group {group}");
        Ok(())
    }

    /// Stop re-joining a group on reconnect.
    pub async fn forget_group(&self, group: &str) -> bool {
        self.shared.groups.lock().await.remove(group)
    }

    pub async fn joined_groups(&self) -> Vec<String> {
        self.shared.groups.lock().await.iter().cloned().collect()
    }

    /// Call a hub method and decode its result.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<T, ChannelError> {
        self.ensure_connected().await?;
        let value = self.shared.invoke_value(method, arguments).await?;
        serde_json::from_value(value)
            .map_err(|e| ChannelError::Protocol(format!("unexpected result of {method}: {e}")))
    }

    /// One bounded connect attempt when not connected.
    async fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        match tokio::time::timeout(self.shared.config.connect_wait, self.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout("hub connection".into())),
        }
    }

    fn spawn_driver(&self, control: &mut Control) {
        if let Some(stale) = control.driver.take() {
            stale.abort();
        }
        *lock(&self.shared.last_error) = None;
        self.shared.state.send_replace(ConnectionState::Connecting);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        control.shutdown = Some(shutdown_tx);
        control.driver = Some(tokio::spawn(Shared::drive(
            Arc::clone(&self.shared),
            shutdown_rx,
        )));
    }
}

impl Shared {
    /// Connection driver: open, serve, reconnect until told to stop or
    /// the policy gives up.
    async fn drive(shared: Arc<Shared>, mut shutdown: oneshot::Receiver<()>) {
        let terminal = shared.serve_with_retries(&mut shutdown).await;

        *shared.outgoing.write().await = None;
        shared.fail_pending().await;
        *lock(&shared.last_error) = Some(
            terminal.unwrap_or_else(|| ChannelError::Connection("disconnected by client".into())),
        );
        shared.state.send_replace(ConnectionState::Disconnected);
    }

    /// Returns `None` on shutdown, the terminal error otherwise.
    async fn serve_with_retries(
        self: &Arc<Self>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Option<ChannelError> {
        let policy = self.config.reconnect.clone();
        let mut failures: u32 = 0;
        let mut reconnecting = false;

        loop {
            if failures > 0 || reconnecting {
                let delay = policy.delay_for(failures);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = &mut *shutdown => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            let opened = tokio::select! {
                _ = &mut *shutdown => return None,
                opened = self.open() => opened,
            };

            match opened {
                Ok((socket, leftovers)) => {
                    failures = 0;
                    match self.run(socket, leftovers, shutdown).await {
                        SessionEnd::Shutdown => return None,
                        SessionEnd::Lost(reason) => {
                            log::warn!("Hub connection lost: {reason}; reconnecting");
                            self.state.send_replace(ConnectionState::Reconnecting);
                            reconnecting = true;
                        }
                        SessionEnd::Closed(reason) => {
                            log::warn!("Hub closed the connection: {reason}");
                            return Some(ChannelError::Connection(reason));
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    if policy.is_exhausted(failures) {
                        log::error!("Giving up on hub connection after {failures} attempts: {err}");
                        return Some(err);
                    }
                    log::warn!("Hub connection attempt {failures} failed: {err}");
                }
            }
        }
    }

    /// Dial, authenticate and complete the handshake.
    ///
    /// Returns the socket plus any records that shared the handshake frame.
    async fn open(&self) -> Result<(Socket, Vec<HubMessage>), ChannelError> {
        let mut url = reqwest::Url::parse(&self.config.url)
            .map_err(|e| ChannelError::Connection(format!("invalid hub url: {e}")))?;
        if let Some(token) = self.tokens.access_token().await {
            url.query_pairs_mut().append_pair("access_token", &token);
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        socket
            .send(Message::Text(protocol::handshake_request().into()))
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let frame = tokio::time::timeout(self.config.handshake_timeout, next_text(&mut socket))
            .await
            .map_err(|_| ChannelError::Timeout("handshake response".into()))??;

        let mut records = protocol::split_records(&frame);
        let handshake = records
            .next()
            .ok_or_else(|| ChannelError::Protocol("empty handshake response".into()))?;
        protocol::parse_handshake_response(handshake)?;

        let leftovers = records
            .filter_map(|record| HubMessage::decode(record).ok())
            .collect();
        Ok((socket, leftovers))
    }

    /// Serve one live socket until it ends.
    async fn run(
        self: &Arc<Self>,
        socket: Socket,
        leftovers: Vec<HubMessage>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
        *self.outgoing.write().await = Some(out_tx);
        *lock(&self.last_error) = None;
        self.state.send_replace(ConnectionState::Connected);
        log::info!("Connected to hub {}", self.config.url);

        for message in leftovers {
            if let Some(end) = self.handle(message).await {
                *self.outgoing.write().await = None;
                return end;
            }
        }
        self.rejoin_groups();

        let mut keep_alive = tokio::time::interval(self.config.keep_alive_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keep_alive.tick().await;
        let mut last_seen = Instant::now();

        let end = loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    break SessionEnd::Shutdown;
                }
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        break SessionEnd::Lost(e.to_string());
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        let mut closed = None;
                        for decoded in protocol::decode_frame(text.as_str()) {
                            match decoded {
                                Ok(message) => {
                                    if let Some(end) = self.handle(message).await {
                                        closed = Some(end);
                                        break;
                                    }
                                }
                                Err(e) => log::warn!("Dropping malformed hub record: {e}"),
                            }
                        }
                        if let Some(end) = closed {
                            break end;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "socket closed".to_string());
                        break SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    None => break SessionEnd::Lost("socket closed".into()),
                },
                _ = keep_alive.tick() => {
                    if last_seen.elapsed() > self.config.server_timeout {
                        break SessionEnd::Lost("no message from server within timeout".into());
                    }
                    if let Ok(ping) = HubMessage::Ping.encode() {
                        if let Err(e) = sink.send(Message::Text(ping.into())).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                }
            }
        };

        *self.outgoing.write().await = None;
        drop(out_rx);
        self.fail_pending().await;
        end
    }

    /// Apply one inbound message. Returns how the session ends, if it does.
    async fn handle(&self, message: HubMessage) -> Option<SessionEnd> {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                if invocation_id.is_some() {
                    log::debug!("Server invocation {target} expects a result; treating as push");
                }
                self.dispatch(&target, arguments);
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => self.complete(&invocation_id, result, error).await,
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let reason = error.unwrap_or_else(|| "server closed the connection".into());
                return Some(if allow_reconnect {
                    SessionEnd::Lost(reason)
                } else {
                    SessionEnd::Closed(reason)
                });
            }
            HubMessage::Ping | HubMessage::Other(_) => {}
        }
        None
    }

    fn dispatch(&self, target: &str, arguments: Vec<Value>) {
        let mut topics = lock(&self.topics);
        let Some(subscribers) = topics.get_mut(&topic_key(target)) else {
            log::debug!("No subscriber for topic {target}");
            return;
        };
        let payload = protocol::topic_payload(arguments);
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
    }

    async fn complete(&self, invocation_id: &str, result: Option<Value>, error: Option<String>) {
        let Some((method, reply)) = self.pending.lock().await.remove(invocation_id) else {
            log::debug!("Completion for unknown invocation {invocation_id}");
            return;
        };
        let outcome = match error {
            Some(message) => Err(ChannelError::Invocation { method, message }),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = reply.send(outcome);
    }

    async fn fail_pending(&self) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, (method, reply)) in drained {
            let _ = reply.send(Err(ChannelError::ConnectionLost { method }));
        }
    }

    async fn invoke_value(&self, method: &str, arguments: Vec<Value>) -> Result<Value, ChannelError> {
        let sender = self
            .outgoing
            .read()
            .await
            .clone()
            .ok_or(ChannelError::NotConnected)?;

        let id = self.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = HubMessage::invocation(Some(id.clone()), method, arguments).encode()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id.clone(), (method.to_string(), reply_tx));

        if sender.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ChannelError::ConnectionLost {
                method: method.to_string(),
            });
        }

        match tokio::time::timeout(self.config.invocation_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChannelError::ConnectionLost {
                method: method.to_string(),
            }),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ChannelError::Timeout(format!("completion of {method}")))
            }
        }
    }

    fn rejoin_groups(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let groups: Vec<String> = shared.groups.lock().await.iter().cloned().collect();
            for group in groups {
                let arguments = vec![Value::String(group.clone())];
                match shared
                    .invoke_value(&shared.config.join_group_method, arguments)
                    .await
                {
                    Ok(_) => log::info!("Re-joined group {group} after reconnect"),
                    Err(e) => log::warn!("Could not re-join group {group}: {e}"),
                }
            }
        });
    }
}

/// Next text frame of a socket that has not been split yet.
async fn next_text(socket: &mut Socket) -> Result<String, ChannelError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ChannelError::Connection("closed during handshake".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ChannelError::Connection(e.to_string())),
        }
    }
}
