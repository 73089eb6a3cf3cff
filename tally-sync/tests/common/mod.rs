//! Shared fixtures: an in-process hub and a scripted HTTP backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use tally_core::{CatalogCategory, ItemCondition, ItemId, ScanResponse, ScanStatus, SessionId, ZoneId};
use tally_sync::api::{
    FinishRequest, InventoryApi, JoinRequest, JoinResponse, ScanRequest, StartRequest,
    StartResponse,
};
use tally_sync::hub::protocol::{split_records, HubMessage};
use tally_sync::ApiError;

/// Find a free port for testing.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A url nothing listens on.
pub async fn dead_hub_url() -> String {
    format!("ws://127.0.0.1:{}/appHub", free_port().await)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(2), async {
        while !check().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

#[derive(Default)]
struct HubState {
    /// `access_token` of every accepted connection, in order.
    tokens: Mutex<Vec<Option<String>>>,
    /// Every group join received.
    joins: Mutex<Vec<String>>,
    /// Group → writers of member connections.
    members: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    connections: AtomicUsize,
    reject_joins: AtomicBool,
}

/// Minimal JSON hub: handshake, group joins, `Echo`, `Hang`, and pushes.
pub struct FakeHub {
    port: u16,
    state: Arc<HubState>,
    kill: broadcast::Sender<()>,
}

impl FakeHub {
    pub async fn start() -> Self {
        let port = free_port().await;
        let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await.unwrap();
        let state = Arc::new(HubState::default());
        let (kill, _) = broadcast::channel(4);

        let accept_state = Arc::clone(&state);
        let accept_kill = kill.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&accept_state),
                    accept_kill.subscribe(),
                ));
            }
        });

        Self { port, state, kill }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/appHub", self.port)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub fn joins(&self) -> Vec<String> {
        self.state.joins.lock().unwrap().clone()
    }

    pub fn reject_joins(&self, reject: bool) {
        self.state.reject_joins.store(reject, Ordering::SeqCst);
    }

    pub async fn wait_for_joins(&self, count: usize) {
        eventually(|| async { self.joins().len() >= count }).await;
    }

    /// Drop every open socket without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.kill.send(());
    }

    /// Push `topic(payload)` to every member of `group`.
    pub fn push(&self, group: &str, topic: &str, payload: Value) {
        let frame = HubMessage::invocation(None, topic, vec![payload])
            .encode()
            .unwrap();
        let mut members = self.state.members.lock().unwrap();
        if let Some(writers) = members.get_mut(group) {
            writers.retain(|tx| tx.send(frame.clone()).is_ok());
        }
    }

    /// Push an `ItemConfirmed` broadcast for a session group.
    pub fn confirm(&self, session_id: i64, item_id: i64) {
        self.push(
            &session_id.to_string(),
            "ItemConfirmed",
            json!({"itemId": item_id, "stateId": 1, "sessionId": session_id}),
        );
    }
}

async fn serve(stream: TcpStream, state: Arc<HubState>, mut kill: broadcast::Receiver<()>) {
    let mut token = None;
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let url = reqwest::Url::parse(&format!("http://hub{}", request.uri())).unwrap();
        token = url
            .query_pairs()
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned());
        Ok(response)
    };
    let Ok(socket) = tokio_tungstenite::accept_hdr_async(stream, capture).await else {
        return;
    };
    state.tokens.lock().unwrap().push(token);
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            _ = kill.recv() => return,
            Some(frame) = rx.recv() => {
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    for record in split_records(text.as_str()) {
                        handle_record(record, &state, &tx);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn handle_record(record: &str, state: &HubState, tx: &mpsc::UnboundedSender<String>) {
    let value: Value = serde_json::from_str(record).unwrap();
    if value.get("protocol").is_some() {
        let _ = tx.send("{}\u{1e}".to_string());
        return;
    }
    let Ok(HubMessage::Invocation {
        invocation_id: Some(id),
        target,
        arguments,
    }) = HubMessage::decode(record)
    else {
        return;
    };

    let reply = match target.as_str() {
        "JoinInventoryGroup" => {
            let group = arguments[0].as_str().unwrap().to_string();
            state.joins.lock().unwrap().push(group.clone());
            if state.reject_joins.load(Ordering::SeqCst) {
                HubMessage::completion_error(id, "Not allowed to join")
            } else {
                state
                    .members
                    .lock()
                    .unwrap()
                    .entry(group)
                    .or_default()
                    .push(tx.clone());
                HubMessage::completion(id, None)
            }
        }
        "Echo" => HubMessage::completion(id, arguments.into_iter().next()),
        "Hang" => return,
        other => HubMessage::completion_error(id, format!("Unknown method {other}")),
    };
    let _ = tx.send(reply.encode().unwrap());
}

/// Scripted [`InventoryApi`] that records every call.
pub struct MockApi {
    pub start: Mutex<Result<StartResponse, ApiError>>,
    pub join: Mutex<Result<JoinResponse, ApiError>>,
    pub finish: Mutex<Result<(), ApiError>>,
    pub scan: Mutex<Result<ScanResponse, ApiError>>,
    pub categories: Mutex<Result<Vec<CatalogCategory>, ApiError>>,
    /// Latency of the start request.
    pub start_delay: Mutex<Duration>,
    calls: Mutex<Vec<&'static str>>,
    pub join_codes: Mutex<Vec<String>>,
    pub scanned_codes: Mutex<Vec<String>>,
}

/// Two categories, expected 3 and 2.
pub fn zone_catalog() -> Vec<CatalogCategory> {
    vec![
        CatalogCategory::new(1, "Furniture", 3)
            .with_item(1, "F-1", "Desk")
            .with_item(2, "F-2", "Chair")
            .with_item(3, "F-3", "Shelf"),
        CatalogCategory::new(2, "IT", 2)
            .with_item(4, "I-4", "Laptop")
            .with_item(5, "I-5", "Monitor"),
    ]
}

impl MockApi {
    /// Session 101 in zone 3, invitation code `D8K4`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Mutex::new(Ok(StartResponse {
                session_id: Some(SessionId(101)),
                invitation_code: Some("D8K4".into()),
            })),
            join: Mutex::new(Ok(JoinResponse {
                zone_id: ZoneId(3),
                session_id: SessionId(101),
            })),
            finish: Mutex::new(Ok(())),
            scan: Mutex::new(Ok(ScanResponse {
                item_id: Some(ItemId(1)),
                is_valid: true,
                status: ScanStatus::Correct,
            })),
            categories: Mutex::new(Ok(zone_catalog())),
            start_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            join_codes: Mutex::new(Vec::new()),
            scanned_codes: Mutex::new(Vec::new()),
        })
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    fn record(&self, operation: &'static str) {
        self.calls.lock().unwrap().push(operation);
    }
}

#[async_trait]
impl InventoryApi for MockApi {
    async fn start(&self, _: StartRequest) -> Result<StartResponse, ApiError> {
        self.record("start");
        let delay = *self.start_delay.lock().unwrap();
        sleep(delay).await;
        self.start.lock().unwrap().clone()
    }

    async fn join(&self, request: JoinRequest) -> Result<JoinResponse, ApiError> {
        self.record("join");
        self.join_codes.lock().unwrap().push(request.invitation_code);
        self.join.lock().unwrap().clone()
    }

    async fn finish(&self, _: FinishRequest) -> Result<(), ApiError> {
        self.record("finish");
        self.finish.lock().unwrap().clone()
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, ApiError> {
        self.record("scan");
        self.scanned_codes.lock().unwrap().push(request.code);
        self.scan.lock().unwrap().clone()
    }

    async fn categories_by_zone(&self, _: ZoneId) -> Result<Vec<CatalogCategory>, ApiError> {
        self.record("categories");
        self.categories.lock().unwrap().clone()
    }

    async fn item_conditions(&self) -> Result<Vec<ItemCondition>, ApiError> {
        self.record("conditions");
        Ok(tally_core::default_conditions())
    }
}
