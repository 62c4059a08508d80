//! Shared test helpers: scripted provider adapters, a live relay server, and a WebSocket client.
#![allow(dead_code)] // helpers used across multiple test crates

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use switchyard_gateway::{serve, AppState, RelaySettings};
use switchyard_runtime::{
    CanonicalEvent, CanonicalStream, GenerationRequest, Provider, ProviderAdapter,
    ProviderCatalog, RelayError, RelayResult, RequestRouter, StreamEnd, StreamItem,
};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Adapter that replays a fixed canonical stream, optionally hanging afterwards.
pub struct ScriptedAdapter {
    provider: Provider,
    items: Vec<StreamItem>,
    hang: bool,
    refuse: Option<RelayError>,
    pub dropped: Arc<AtomicBool>,
    pub calls: AtomicU32,
    pub last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedAdapter {
    pub fn new(provider: Provider, items: Vec<StreamItem>) -> Self {
        Self {
            provider,
            items,
            hang: false,
            refuse: None,
            dropped: Arc::new(AtomicBool::new(false)),
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Replies "Hi" then " there" and stops normally.
    pub fn replying(provider: Provider) -> Self {
        Self::new(
            provider,
            vec![
                event(CanonicalEvent::RoleAnnounce("assistant".into())),
                event(CanonicalEvent::DataChunk("Hi".into())),
                event(CanonicalEvent::DataChunk(" there".into())),
                StreamItem::End(StreamEnd::Stop),
            ],
        )
    }

    /// Sends one chunk and then never finishes.
    pub fn hanging(provider: Provider) -> Self {
        let partial = event(CanonicalEvent::DataChunk("partial".into()));
        let mut adapter = Self::new(provider, vec![partial]);
        adapter.hang = true;
        adapter
    }

    /// Sends `chunks` data events of `bytes` each, then never finishes.
    pub fn flooding(provider: Provider, chunks: usize, bytes: usize) -> Self {
        let chunk = "x".repeat(bytes);
        let items = (0..chunks)
            .map(|_| event(CanonicalEvent::DataChunk(chunk.clone())))
            .collect();
        let mut adapter = Self::new(provider, items);
        adapter.hang = true;
        adapter
    }

    /// Fails to start with the given error.
    pub fn refusing(provider: Provider, err: RelayError) -> Self {
        let mut adapter = Self::new(provider, Vec::new());
        adapter.refuse = Some(err);
        adapter
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn send(&self, request: &GenerationRequest) -> RelayResult<CanonicalStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }

        let guard = DropFlag(self.dropped.clone());
        let items = stream::iter(self.items.clone());
        let stream = if self.hang {
            items.chain(stream::pending()).boxed()
        } else {
            items.boxed()
        };
        Ok(stream
            .map(move |item| {
                let _ = &guard;
                item
            })
            .boxed())
    }
}

pub fn event(event: CanonicalEvent) -> StreamItem {
    StreamItem::Event(event)
}

/// Router over the built-in catalog where every provider uses `adapter`'s script.
pub fn router_with(adapters: Vec<Arc<ScriptedAdapter>>) -> RequestRouter {
    let mut router = RequestRouter::new(Arc::new(ProviderCatalog::builtin()));
    for adapter in adapters {
        router = router.with_adapter(adapter);
    }
    router
}

pub fn make_test_state(adapter: Arc<ScriptedAdapter>) -> AppState {
    AppState::new(router_with(vec![adapter]), RelaySettings::default())
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(state: AppState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, state.clone(), async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            state,
            stop: Some(stop),
            handle,
        }
    }

    pub async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/", self.addr)).await.unwrap();
        client
    }

    /// Trigger shutdown without waiting for the server to finish.
    pub fn trigger_shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    pub async fn shutdown(mut self) {
        self.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }

    /// Poll until no session is registered.
    pub async fn wait_for_no_sessions(&self) {
        for _ in 0..100 {
            if self.state.registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("sessions still open: {}", self.state.registry.len());
    }
}

pub async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .unwrap();
}

/// Next frame from the server, decoded. Close frames come back as `{"close": code, "reason": ...}`.
pub async fn next_frame(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended without a close frame")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(Some(frame)) => {
                return serde_json::json!({
                    "close": u16::from(frame.code),
                    "reason": frame.reason.as_str(),
                })
            }
            Message::Close(None) => return serde_json::json!({"close": null}),
            _ => continue,
        }
    }
}

/// Read frames until the close frame, returning everything before it and the close itself.
pub async fn read_until_close(client: &mut Client) -> (Vec<Value>, Value) {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(client).await;
        if frame.get("close").is_some() {
            return (frames, frame);
        }
        frames.push(frame);
    }
}
