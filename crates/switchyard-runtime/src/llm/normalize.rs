//! Provider-native event streams to canonical events.
//!
//! Each normalizer is a single consumer of its raw stream and yields events
//! followed by exactly one `StreamItem::End`. Raw errors never escape; they
//! become an `ErrorEvent` followed by `End(Failed)`.

use async_stream::stream;
use futures::StreamExt;

use super::provider::CanonicalStream;
use super::streaming::{AnthropicEvent, BlockBoundary, GeminiChunk, OpenAIChunk, RawStream};
use crate::error::RelayError;
use crate::types::{CanonicalEvent, Provider, StreamEnd, StreamItem};

fn failed(err: RelayError) -> [StreamItem; 2] {
    [
        StreamItem::Event(CanonicalEvent::error(&err)),
        StreamItem::End(StreamEnd::Failed(err)),
    ]
}

fn unterminated(provider: Provider) -> RelayError {
    RelayError::ProviderStream {
        provider,
        message: "upstream stream ended without a stop reason".to_string(),
    }
}

pub fn openai(raw: RawStream<OpenAIChunk>) -> CanonicalStream {
    Box::pin(stream! {
        let mut raw = raw;
        // Only the first role counts, and only if no data went out before it.
        let mut role_settled = false;

        while let Some(item) = raw.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    for out in failed(err) {
                        yield out;
                    }
                    return;
                }
            };

            if let Some(role) = chunk.role {
                if !role_settled {
                    role_settled = true;
                    yield StreamItem::Event(CanonicalEvent::RoleAnnounce(role));
                }
            }

            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                role_settled = true;
                yield StreamItem::Event(CanonicalEvent::DataChunk(content));
            }

            if let Some(reason) = chunk.finish_reason {
                let end = if reason == "length" {
                    StreamEnd::Length
                } else {
                    StreamEnd::Stop
                };
                yield StreamItem::End(end);
                return;
            }
        }

        for out in failed(unterminated(Provider::OpenAI)) {
            yield out;
        }
    })
}

/// Open/closed state of the current Anthropic content block.
#[derive(Debug, Default)]
pub struct BlockState {
    open: bool,
}

impl BlockState {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// A start while a block is open closes the old block first.
    pub fn start(&mut self) -> Vec<CanonicalEvent> {
        let mut out = Vec::with_capacity(2);
        if self.open {
            out.push(CanonicalEvent::BlockEnd);
        }
        self.open = true;
        out.push(CanonicalEvent::BlockStart);
        out
    }

    /// Close the open block, if any.
    pub fn stop(&mut self) -> Option<CanonicalEvent> {
        if self.open {
            self.open = false;
            Some(CanonicalEvent::BlockEnd)
        } else {
            None
        }
    }
}

pub fn anthropic(raw: RawStream<AnthropicEvent>) -> CanonicalStream {
    Box::pin(stream! {
        let mut raw = raw;
        let mut blocks = BlockState::default();
        let mut hit_max_tokens = false;

        while let Some(item) = raw.next().await {
            match item {
                Ok(AnthropicEvent::Text(text)) => {
                    yield StreamItem::Event(CanonicalEvent::DataChunk(text));
                }
                Ok(AnthropicEvent::ContentBlock(BlockBoundary::Start)) => {
                    for event in blocks.start() {
                        yield StreamItem::Event(event);
                    }
                }
                Ok(AnthropicEvent::ContentBlock(BlockBoundary::Stop)) => {
                    if let Some(event) = blocks.stop() {
                        yield StreamItem::Event(event);
                    }
                }
                Ok(AnthropicEvent::MessageDelta { stop_reason }) => {
                    if stop_reason.as_deref() == Some("max_tokens") {
                        hit_max_tokens = true;
                    }
                }
                Ok(AnthropicEvent::End) => {
                    if let Some(event) = blocks.stop() {
                        yield StreamItem::Event(event);
                    }
                    let end = if hit_max_tokens {
                        StreamEnd::Length
                    } else {
                        StreamEnd::Stop
                    };
                    yield StreamItem::End(end);
                    return;
                }
                Ok(AnthropicEvent::Error { name, message }) => {
                    if let Some(event) = blocks.stop() {
                        yield StreamItem::Event(event);
                    }
                    let err = RelayError::Provider {
                        name,
                        message,
                        status: None,
                    };
                    for out in failed(err) {
                        yield out;
                    }
                    return;
                }
                Err(err) => {
                    if let Some(event) = blocks.stop() {
                        yield StreamItem::Event(event);
                    }
                    for out in failed(err) {
                        yield out;
                    }
                    return;
                }
            }
        }

        if let Some(event) = blocks.stop() {
            yield StreamItem::Event(event);
        }
        for out in failed(unterminated(Provider::Anthropic)) {
            yield out;
        }
    })
}

pub fn gemini(raw: RawStream<GeminiChunk>) -> CanonicalStream {
    Box::pin(stream! {
        let mut raw = raw;

        while let Some(item) = raw.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    for out in failed(err) {
                        yield out;
                    }
                    return;
                }
            };

            yield StreamItem::Event(CanonicalEvent::DataChunk(chunk.text));

            if let Some(reason) = chunk.finish_reason {
                let end = if reason == "MAX_TOKENS" {
                    StreamEnd::Length
                } else {
                    StreamEnd::Stop
                };
                yield StreamItem::End(end);
                return;
            }
        }

        for out in failed(unterminated(Provider::Gemini)) {
            yield out;
        }
    })
}
