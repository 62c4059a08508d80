use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Upstream provider family, in routing priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Gemini,
}

impl Provider {
    /// Fixed routing priority: OpenAI, then Anthropic, then Gemini.
    pub const ALL: [Provider; 3] = [Provider::OpenAI, Provider::Anthropic, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message role in conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" | "model" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(RelayError::payload(format!("unknown role '{}'", other))),
        }
    }
}

/// One turn of conversation history as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            name: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Client request for one streamed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    /// An explicit `null` reads as no history.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub previous_messages: Vec<ChatMessage>,
    /// Stored conversation to load history from and record into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ChatMessage>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<Vec<ChatMessage>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl GenerationRequest {
    pub fn new(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            previous_messages: Vec::new(),
            conversation_id: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.previous_messages = history;
        self
    }

    /// Parse and validate a client frame.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let request: GenerationRequest = serde_json::from_str(text).map_err(|e| {
            RelayError::payload(format!(
                "payload doesn't match the generation request shape: {}",
                e
            ))
        })?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.model.trim().is_empty() {
            return Err(RelayError::payload("model must be a non-empty string"));
        }
        Ok(())
    }
}

/// Error body carried by a canonical `Error` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContent {
    pub error_name: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
}

/// Provider-agnostic event pushed to every client.
///
/// Serializes as `{"status": "...", "content": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "content")]
pub enum CanonicalEvent {
    #[serde(rename = "Role")]
    RoleAnnounce(String),
    #[serde(rename = "Data")]
    DataChunk(String),
    BlockStart,
    BlockEnd,
    #[serde(rename = "Error")]
    ErrorEvent(ErrorContent),
}

impl CanonicalEvent {
    pub fn error(err: &RelayError) -> Self {
        CanonicalEvent::ErrorEvent(err.to_content())
    }
}

/// How a normalized stream finished.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    Stop,
    Length,
    /// Always preceded by an `ErrorEvent` carrying the same error.
    Failed(RelayError),
}

impl StreamEnd {
    pub fn close_code(&self) -> u16 {
        match self {
            StreamEnd::Stop | StreamEnd::Length => crate::error::close_code::NORMAL,
            StreamEnd::Failed(err) => err.close_code(),
        }
    }

    pub fn close_reason(&self) -> &'static str {
        match self {
            StreamEnd::Stop => "stop",
            StreamEnd::Length => "length",
            StreamEnd::Failed(_) => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, StreamEnd::Failed(_))
    }
}

/// Output of a stream normalizer: events, then exactly one `End`.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(CanonicalEvent),
    End(StreamEnd),
}
