//! HTTP transport underneath every provider adapter.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;

use crate::error::{RelayError, RelayResult};
use crate::types::Provider;

/// Raw response body, chunk by chunk.
pub type ByteStream = BoxStream<'static, RelayResult<Bytes>>;

/// One streaming POST to a provider.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub provider: Provider,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

/// Opens an upstream call and hands back its body as a byte stream.
///
/// Dropping the returned stream aborts the underlying request.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn open(&self, call: UpstreamCall) -> RelayResult<ByteStream>;
}

/// reqwest-backed upstream. There is no overall request timeout here; the
/// session enforces the generation deadline.
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn open(&self, call: UpstreamCall) -> RelayResult<ByteStream> {
        let mut request = self.client.post(&call.url).json(&call.body);
        for (name, value) in &call.headers {
            request = request.header(*name, value);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(error_from_body(call.provider, Some(status.as_u16()), &error_body));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from))
            .boxed())
    }
}

/// Turn a provider error body into a `RelayError::Provider`.
///
/// All three providers nest the detail under `error`; Anthropic names it with
/// `error.type`, OpenAI with `error.type`/`error.code`, Gemini with `error.status`.
pub fn error_from_body(provider: Provider, status: Option<u16>, body: &str) -> RelayError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|v| v.get("error"));

    let name = detail
        .and_then(|e| e.get("type").or_else(|| e.get("status")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}Error", provider_label(provider)));

    let message = detail
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let label = provider_label(provider);
            match (status, body.is_empty()) {
                (Some(code), true) => format!("{} API error ({})", label, code),
                (Some(code), false) => format!("{} API error ({}): {}", label, code, body),
                (None, _) => format!("{} API error: {}", label, body),
            }
        });

    RelayError::Provider {
        name,
        message,
        status,
    }
}

fn provider_label(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "OpenAI",
        Provider::Anthropic => "Anthropic",
        Provider::Gemini => "Gemini",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_anthropic_body() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = error_from_body(Provider::Anthropic, Some(529), body);
        assert_eq!(err.name(), "overloaded_error");
        assert_eq!(err.to_string(), "Overloaded");
        assert_eq!(err.status(), Some(529));
    }

    #[test]
    fn test_error_from_gemini_body() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let err = error_from_body(Provider::Gemini, Some(400), body);
        assert_eq!(err.name(), "INVALID_ARGUMENT");
        assert_eq!(err.to_string(), "API key not valid");
    }

    #[test]
    fn test_error_from_unstructured_body() {
        let err = error_from_body(Provider::OpenAI, Some(502), "bad gateway");
        assert_eq!(err.name(), "OpenAIError");
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }
}
