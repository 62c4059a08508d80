//! SSE framing and provider-native event parsing.
//! Handles OpenAI, Anthropic and Gemini server-sent event formats.

use std::future::ready;

use async_stream::stream;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use super::upstream::{error_from_body, ByteStream};
use crate::error::{RelayError, RelayResult};
use crate::types::Provider;

/// Lazy sequence of provider-native events.
pub type RawStream<E> = BoxStream<'static, RelayResult<E>>;

/// One decoded server-sent event.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Largest SSE frame accepted before the stream is abandoned (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Split a byte stream into SSE frames. UTF-8 is decoded at event boundaries,
/// so multi-byte characters split across HTTP chunks survive.
pub fn sse_frames(bytes: ByteStream) -> RawStream<SseFrame> {
    sse_frames_with_limit(bytes, MAX_FRAME_BYTES)
}

pub(crate) fn sse_frames_with_limit(bytes: ByteStream, limit: usize) -> RawStream<SseFrame> {
    cap_frame_size(bytes, limit)
        .eventsource()
        .map(|item| match item {
            Ok(event) => Ok(SseFrame {
                event: event.event,
                data: event.data,
            }),
            Err(EventStreamError::Transport(err)) => Err(err),
            Err(other) => Err(RelayError::internal(format!(
                "malformed event stream: {}",
                other
            ))),
        })
        .boxed()
}

/// Pass bytes through until more than `limit` bytes arrive without a blank
/// line, then yield one error and stop.
fn cap_frame_size(bytes: ByteStream, limit: usize) -> ByteStream {
    Box::pin(stream! {
        let mut bytes = bytes;
        let mut pending = 0usize;
        let mut after_newline = false;

        while let Some(chunk) = bytes.next().await {
            if let Ok(data) = &chunk {
                for &b in data.iter() {
                    match b {
                        b'\r' => {}
                        b'\n' if after_newline => {
                            pending = 0;
                            after_newline = false;
                        }
                        b'\n' => {
                            pending += 1;
                            after_newline = true;
                        }
                        _ => {
                            pending += 1;
                            after_newline = false;
                        }
                    }
                }
                if pending > limit {
                    tracing::error!(limit, "SSE frame exceeded size limit, aborting stream");
                    yield Err(RelayError::internal(format!(
                        "SSE frame exceeded {} bytes",
                        limit
                    )));
                    return;
                }
            }
            yield chunk;
        }
    })
}

// --- OpenAI ---

/// One `chat.completion.chunk`, reduced to its first choice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenAIChunk {
    pub role: Option<String>,
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIWire {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    delta: Option<OpenAIDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    role: Option<String>,
    content: Option<String>,
}

/// Parse an OpenAI SSE data payload.
/// Returns `Ok(None)` for payloads that carry nothing to relay.
pub fn parse_openai_sse(data: &str) -> RelayResult<Option<OpenAIChunk>> {
    let value: serde_json::Value = match serde_json::from_str(data.trim()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable OpenAI event");
            return Ok(None);
        }
    };

    if value.get("error").is_some() {
        return Err(error_from_body(Provider::OpenAI, None, data));
    }

    let wire: OpenAIWire = match serde_json::from_value(value) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unexpected OpenAI event shape");
            return Ok(None);
        }
    };

    let Some(choice) = wire.choices.into_iter().next() else {
        return Ok(None);
    };

    let (role, content) = choice
        .delta
        .map(|d| (d.role, d.content))
        .unwrap_or((None, None));

    Ok(Some(OpenAIChunk {
        role,
        content,
        finish_reason: choice.finish_reason,
    }))
}

/// OpenAI frames up to the `[DONE]` sentinel.
pub fn openai_events(bytes: ByteStream) -> RawStream<OpenAIChunk> {
    sse_frames(bytes)
        .try_take_while(|frame| ready(Ok(frame.data.trim() != "[DONE]")))
        .try_filter_map(|frame| ready(parse_openai_sse(&frame.data)))
        .boxed()
}

// --- Anthropic ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockBoundary {
    Start,
    Stop,
}

/// Anthropic message-stream events the relay acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum AnthropicEvent {
    Text(String),
    ContentBlock(BlockBoundary),
    MessageDelta { stop_reason: Option<String> },
    End,
    Error { name: String, message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicWire {
    #[serde(rename = "content_block_start")]
    ContentBlockStart,
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: AnthropicDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop,
    #[serde(rename = "message_delta")]
    MessageDelta { delta: AnthropicMessageDelta },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: AnthropicErrorBody },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Parse an Anthropic SSE data payload.
/// Returns `None` for events with nothing to relay (ping, message_start, tool deltas).
pub fn parse_anthropic_sse(data: &str) -> Option<AnthropicEvent> {
    let event: AnthropicWire = match serde_json::from_str(data) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable Anthropic event");
            return None;
        }
    };

    match event {
        AnthropicWire::ContentBlockStart => {
            Some(AnthropicEvent::ContentBlock(BlockBoundary::Start))
        }
        AnthropicWire::ContentBlockStop => Some(AnthropicEvent::ContentBlock(BlockBoundary::Stop)),
        AnthropicWire::ContentBlockDelta { delta } => match delta {
            AnthropicDelta::TextDelta { text } => Some(AnthropicEvent::Text(text)),
            AnthropicDelta::Other => None,
        },
        AnthropicWire::MessageDelta { delta } => Some(AnthropicEvent::MessageDelta {
            stop_reason: delta.stop_reason,
        }),
        AnthropicWire::MessageStop => Some(AnthropicEvent::End),
        AnthropicWire::Error { error } => Some(AnthropicEvent::Error {
            name: error.error_type,
            message: error.message,
        }),
        AnthropicWire::Unknown => None,
    }
}

pub fn anthropic_events(bytes: ByteStream) -> RawStream<AnthropicEvent> {
    sse_frames(bytes)
        .try_filter_map(|frame| ready(Ok(parse_anthropic_sse(&frame.data))))
        .boxed()
}

/// Turn an `error` event that arrives before anything else into a stream
/// error, so a call that never started counts as a failed start.
pub fn leading_error_fails(raw: RawStream<AnthropicEvent>) -> RawStream<AnthropicEvent> {
    raw.enumerate()
        .map(|(index, item)| match item {
            Ok(AnthropicEvent::Error { name, message }) if index == 0 => {
                Err(RelayError::Provider {
                    name,
                    message,
                    status: None,
                })
            }
            other => other,
        })
        .boxed()
}

// --- Gemini ---

/// One streamed `GenerateContentResponse`, reduced to its first candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeminiChunk {
    pub text: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiWire {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

/// Parse a Gemini SSE data payload.
/// A blocked prompt arrives with no candidates and a `promptFeedback.blockReason`,
/// which is reported as the finish reason.
pub fn parse_gemini_sse(data: &str) -> RelayResult<Option<GeminiChunk>> {
    let value: serde_json::Value = match serde_json::from_str(data.trim()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable Gemini event");
            return Ok(None);
        }
    };

    if value.get("error").is_some() {
        return Err(error_from_body(Provider::Gemini, None, data));
    }

    let wire: GeminiWire = match serde_json::from_value(value) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unexpected Gemini event shape");
            return Ok(None);
        }
    };

    if let Some(candidate) = wire.candidates.into_iter().next() {
        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        return Ok(Some(GeminiChunk {
            text,
            finish_reason: candidate.finish_reason,
        }));
    }

    Ok(wire
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .map(|reason| GeminiChunk {
            text: String::new(),
            finish_reason: Some(reason),
        }))
}

pub fn gemini_events(bytes: ByteStream) -> RawStream<GeminiChunk> {
    sse_frames(bytes)
        .try_filter_map(|frame| ready(parse_gemini_sse(&frame.data)))
        .boxed()
}
