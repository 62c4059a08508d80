use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::normalize;
use super::provider::{ensure_model, CanonicalStream, ProviderAdapter, ProviderSettings};
use super::streaming::{openai_events, OpenAIChunk, RawStream};
use super::upstream::{Upstream, UpstreamCall};
use crate::catalog::ProviderCatalog;
use crate::error::RelayResult;
use crate::restructure::flatten;
use crate::retry::{open_with_retry, RetryPolicy};
use crate::types::{GenerationRequest, Provider};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions adapter
pub struct OpenAIAdapter {
    upstream: Arc<dyn Upstream>,
    catalog: Arc<ProviderCatalog>,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl OpenAIAdapter {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        catalog: Arc<ProviderCatalog>,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            upstream,
            catalog,
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the streaming chat completion body
    fn build_request_body(&self, request: &GenerationRequest) -> Value {
        let messages: Vec<Value> = flatten(&request.previous_messages, &request.prompt)
            .into_iter()
            .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content}))
            .collect();

        json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
        })
    }

    fn call(&self, request: &GenerationRequest) -> UpstreamCall {
        UpstreamCall {
            provider: Provider::OpenAI,
            url: format!(
                "{}/chat/completions",
                self.settings.base_url_or(OPENAI_API_URL)
            ),
            headers: vec![(
                "authorization",
                format!("Bearer {}", self.settings.api_key),
            )],
            body: self.build_request_body(request),
        }
    }

    /// Start the call and return OpenAI's raw chunk stream.
    pub async fn open(&self, request: &GenerationRequest) -> RelayResult<RawStream<OpenAIChunk>> {
        ensure_model(&self.catalog, Provider::OpenAI, &request.model)?;
        let call = self.call(request);

        open_with_retry(&self.retry, Provider::OpenAI, || {
            let upstream = self.upstream.clone();
            let call = call.clone();
            async move { upstream.open(call).await.map(openai_events) }
        })
        .await
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn send(&self, request: &GenerationRequest) -> RelayResult<CanonicalStream> {
        let raw = self.open(request).await?;
        Ok(normalize::openai(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::upstream::ByteStream;
    use crate::types::{ChatMessage, Role};

    struct NeverUpstream;

    #[async_trait]
    impl Upstream for NeverUpstream {
        async fn open(&self, _call: UpstreamCall) -> RelayResult<ByteStream> {
            panic!("upstream should not be called");
        }
    }

    fn adapter() -> OpenAIAdapter {
        OpenAIAdapter::new(
            Arc::new(NeverUpstream),
            Arc::new(ProviderCatalog::builtin()),
            ProviderSettings::new("sk-test").with_max_tokens(512),
        )
    }

    #[test]
    fn test_build_request_body() {
        let request = GenerationRequest::new("gpt-4o", "and now?").with_history(vec![
            ChatMessage::new(Role::System, "be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        let body = adapter().build_request_body(&request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 512);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[3], json!({"role": "user", "content": "and now?"}));
    }

    #[test]
    fn test_call_targets_chat_completions() {
        let call = adapter().call(&GenerationRequest::new("gpt-4o", "hi"));
        assert_eq!(call.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(call.headers[0].1, "Bearer sk-test");
    }

    #[tokio::test]
    async fn test_rejects_foreign_model() {
        let err = adapter()
            .send(&GenerationRequest::new("claude-3-haiku-20240307", "hi"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.name(), "InvalidModelError");
    }
}
