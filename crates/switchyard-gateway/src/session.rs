//! One client connection: parse, route, relay, close.
//!
//! A session runs at most one generation at a time and moves through
//! `Idle -> Dispatching -> Streaming -> Closed`. Validation and routing errors
//! return it to `Idle`; every other outcome closes the connection.

use std::future::Future;

use anyhow::anyhow;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use switchyard_runtime::storage::load_history;
use switchyard_runtime::{
    close_code, CanonicalEvent, ChatMessage, GenerationRequest, RelayError, StreamItem,
};

use crate::server::AppState;

const SHUTDOWN_REASON: &str = "Server shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatching,
    Streaming,
    Closed,
}

/// What woke a session while a generation was in flight.
enum Wake<T> {
    Ready(T),
    Shutdown,
    TimedOut,
    PeerClosed,
    Transport(String),
}

/// Whether the session keeps reading after handling a frame.
enum Flow {
    Continue,
    Stop,
}

pub struct ConnectionSession {
    id: String,
    sink: SplitSink<WebSocket, Message>,
    state: AppState,
    phase: Phase,
    closed: bool,
    /// Set once a bounded send times out; no further frames are attempted.
    stalled: bool,
}

/// Serve one upgraded connection until it closes.
pub async fn run(socket: WebSocket, state: AppState) {
    let guard = state.registry.register();
    let (sink, mut inbound) = socket.split();
    let mut session = ConnectionSession {
        id: guard.id().to_string(),
        sink,
        state,
        phase: Phase::Idle,
        closed: false,
        stalled: false,
    };

    info!(session_id = %session.id, "Client connected");
    session.serve(&mut inbound).await;
    info!(session_id = %session.id, "Session ended");
}

impl ConnectionSession {
    async fn serve(&mut self, inbound: &mut SplitStream<WebSocket>) {
        while !self.closed {
            let frame = tokio::select! {
                _ = self.state.shutdown.cancelled() => {
                    self.close(close_code::GOING_AWAY, SHUTDOWN_REASON).await;
                    return;
                }
                frame = inbound.next() => frame,
            };

            let flow = match frame {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), inbound).await,
                Some(Ok(Message::Binary(_))) => {
                    self.reject(RelayError::payload("binary frames are not supported"))
                        .await
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Flow::Continue,
                // The close reply goes out on the next read, which then ends the stream.
                Some(Ok(Message::Close(_))) => Flow::Continue,
                Some(Err(e)) => {
                    error!(session_id = %self.id, error = %e, "WebSocket transport error");
                    self.close(close_code::INTERNAL, "transport error").await;
                    Flow::Stop
                }
                None => {
                    info!(session_id = %self.id, "Client disconnected");
                    self.closed = true;
                    self.phase = Phase::Closed;
                    Flow::Stop
                }
            };

            if let Flow::Stop = flow {
                return;
            }
        }
    }

    async fn handle_text(&mut self, text: &str, inbound: &mut SplitStream<WebSocket>) -> Flow {
        let limit = self.state.settings.max_message_bytes;
        if text.len() > limit {
            return self
                .reject(RelayError::payload(format!(
                    "message exceeds maximum length of {} bytes",
                    limit
                )))
                .await;
        }

        let request = match GenerationRequest::parse(text) {
            Ok(request) => request,
            Err(e) => return self.reject(e).await,
        };

        self.phase = Phase::Dispatching;
        let adapter = match self.state.router.route(&request.model) {
            Ok(adapter) => adapter,
            Err(e) if e.is_recoverable() => return self.reject(e).await,
            Err(e) => {
                self.fail(e).await;
                return Flow::Stop;
            }
        };

        let request = self.hydrate(request);
        self.record(&request, ChatMessage::user(&request.prompt));

        info!(
            session_id = %self.id,
            provider = %adapter.provider(),
            model = %request.model,
            history = request.previous_messages.len(),
            "Dispatching generation"
        );

        let deadline = Instant::now() + self.state.settings.generation_timeout;
        let mut stream = match self.guarded(inbound, deadline, adapter.send(&request)).await {
            Wake::Ready(Ok(stream)) => stream,
            Wake::Ready(Err(e)) if e.is_recoverable() => return self.reject(e).await,
            Wake::Ready(Err(e)) => {
                self.fail(e).await;
                return Flow::Stop;
            }
            other => {
                self.interrupted(other).await;
                return Flow::Stop;
            }
        };

        self.phase = Phase::Streaming;
        let mut reply = String::new();
        loop {
            match self.guarded(inbound, deadline, stream.next()).await {
                Wake::Ready(Some(StreamItem::Event(event))) => {
                    if let CanonicalEvent::DataChunk(text) = &event {
                        reply.push_str(text);
                    }
                    match self.relay(&event, deadline).await {
                        Wake::Ready(Ok(())) => {}
                        Wake::Ready(Err(e)) => {
                            error!(session_id = %self.id, error = %e, "Failed to relay event");
                            self.close(close_code::INTERNAL, "transport error").await;
                            return Flow::Stop;
                        }
                        other => {
                            drop(stream);
                            self.interrupted(other).await;
                            return Flow::Stop;
                        }
                    }
                }
                Wake::Ready(Some(StreamItem::End(end))) => {
                    info!(
                        session_id = %self.id,
                        reason = end.close_reason(),
                        chars = reply.len(),
                        "Generation finished"
                    );
                    if end.is_success() {
                        self.record(&request, ChatMessage::assistant(&reply));
                    }
                    self.close(end.close_code(), end.close_reason()).await;
                    return Flow::Stop;
                }
                Wake::Ready(None) => {
                    self.fail(RelayError::internal("stream ended without a terminal event"))
                        .await;
                    return Flow::Stop;
                }
                other => {
                    // Dropping the stream aborts the upstream call.
                    drop(stream);
                    self.interrupted(other).await;
                    return Flow::Stop;
                }
            }
        }
    }

    /// Await `work` while watching for shutdown, the deadline and the peer.
    ///
    /// Text frames that arrive meanwhile are ignored; one generation per session.
    async fn guarded<F: Future>(
        &self,
        inbound: &mut SplitStream<WebSocket>,
        deadline: Instant,
        work: F,
    ) -> Wake<F::Output> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                _ = self.state.shutdown.cancelled() => return Wake::Shutdown,
                _ = tokio::time::sleep_until(deadline) => return Wake::TimedOut,
                frame = inbound.next() => match frame {
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                        warn!(
                            session_id = %self.id,
                            "Ignoring frame while a generation is in flight"
                        );
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return Wake::PeerClosed,
                    Some(Err(e)) => return Wake::Transport(e.to_string()),
                },
                out = &mut work => return Wake::Ready(out),
            }
        }
    }

    /// Push one event to the client. A client that stops reading blocks the
    /// send, so it races shutdown and the deadline like every other await.
    async fn relay(
        &mut self,
        event: &CanonicalEvent,
        deadline: Instant,
    ) -> Wake<Result<(), axum::Error>> {
        let Some(message) = self.encode(event) else {
            return Wake::Ready(Ok(()));
        };
        let shutdown = self.state.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Wake::Shutdown,
            _ = tokio::time::sleep_until(deadline) => Wake::TimedOut,
            sent = self.sink.send(message) => Wake::Ready(sent),
        }
    }

    async fn interrupted<T>(&mut self, wake: Wake<T>) {
        match wake {
            Wake::Ready(_) => {}
            Wake::Shutdown => {
                self.fail(RelayError::Aborted(SHUTDOWN_REASON.to_string()))
                    .await
            }
            Wake::TimedOut => {
                let secs = self.state.settings.generation_timeout.as_secs();
                warn!(session_id = %self.id, timeout_secs = secs, "Generation timed out");
                self.fail(RelayError::Timeout(secs)).await
            }
            Wake::PeerClosed => {
                info!(
                    session_id = %self.id,
                    "Client disconnected mid-generation, upstream cancelled"
                );
                self.closed = true;
                self.phase = Phase::Closed;
            }
            Wake::Transport(e) => {
                error!(session_id = %self.id, error = %e, "WebSocket transport error");
                self.close(close_code::INTERNAL, "transport error").await;
            }
        }
    }

    /// Report a recoverable error and return to Idle.
    async fn reject(&mut self, err: RelayError) -> Flow {
        debug!(session_id = %self.id, error = %err, name = err.name(), "Rejected request");
        self.phase = Phase::Idle;
        match self.send_event(&CanonicalEvent::error(&err)).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Failed to send error event");
                self.close(close_code::INTERNAL, "transport error").await;
                Flow::Stop
            }
        }
    }

    /// Report a terminal error, then close with its code.
    async fn fail(&mut self, err: RelayError) {
        warn!(session_id = %self.id, error = %err, name = err.name(), "Generation failed");
        if let Err(e) = self.send_event(&CanonicalEvent::error(&err)).await {
            debug!(session_id = %self.id, error = %e, "Could not deliver error event");
        }
        let reason = match &err {
            RelayError::Aborted(_) => SHUTDOWN_REASON,
            _ => "error",
        };
        self.close(err.close_code(), reason).await;
    }

    fn encode(&self, event: &CanonicalEvent) -> Option<Message> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Failed to serialize event");
                None
            }
        }
    }

    async fn send_event(&mut self, event: &CanonicalEvent) -> anyhow::Result<()> {
        match self.encode(event) {
            Some(message) => self.send_bounded(message).await,
            None => Ok(()),
        }
    }

    /// Send with `send_timeout` as the bound. A timeout marks the session stalled.
    async fn send_bounded(&mut self, message: Message) -> anyhow::Result<()> {
        if self.stalled {
            return Err(anyhow!("client stopped reading"));
        }
        let limit = self.state.settings.send_timeout;
        match tokio::time::timeout(limit, self.sink.send(message)).await {
            Ok(sent) => sent.map_err(anyhow::Error::from),
            Err(_) => {
                self.stalled = true;
                Err(anyhow!("send timed out after {:?}", limit))
            }
        }
    }

    /// Send a close frame. Later calls are no-ops.
    async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        let from = std::mem::replace(&mut self.phase, Phase::Closed);
        self.closed = true;

        info!(session_id = %self.id, code, reason, phase = ?from, "Closing connection");
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        };
        if let Err(e) = self.send_bounded(Message::Close(Some(frame))).await {
            debug!(session_id = %self.id, error = %e, "Close frame not delivered");
        }
    }

    /// Fill in history from the store when the client names a conversation but sends none.
    fn hydrate(&self, mut request: GenerationRequest) -> GenerationRequest {
        let (Some(store), Some(conversation_id)) = (&self.state.store, request.conversation_id)
        else {
            return request;
        };
        if !request.previous_messages.is_empty() {
            return request;
        }

        match load_history(store.as_ref(), conversation_id, self.state.settings.history_limit) {
            Ok(history) => request.previous_messages = history,
            Err(e) => {
                warn!(session_id = %self.id, conversation_id, error = %e, "Failed to load history")
            }
        }
        request
    }

    fn record(&self, request: &GenerationRequest, message: ChatMessage) {
        let (Some(store), Some(conversation_id)) = (&self.state.store, request.conversation_id)
        else {
            return;
        };
        if let Err(e) = store.save_message(conversation_id, &message) {
            warn!(
                session_id = %self.id,
                conversation_id,
                error = %e,
                "Failed to record message"
            );
        }
    }
}
