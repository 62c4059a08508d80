use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::normalize;
use super::provider::{ensure_model, CanonicalStream, ProviderAdapter, ProviderSettings};
use super::streaming::{anthropic_events, leading_error_fails, AnthropicEvent, RawStream};
use super::upstream::{Upstream, UpstreamCall};
use crate::catalog::ProviderCatalog;
use crate::error::RelayResult;
use crate::restructure::flatten;
use crate::retry::{open_with_retry, RetryPolicy};
use crate::types::{GenerationRequest, Provider, Role};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter
pub struct AnthropicAdapter {
    upstream: Arc<dyn Upstream>,
    catalog: Arc<ProviderCatalog>,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl AnthropicAdapter {
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

    fn build_request_body(&self, request: &GenerationRequest) -> Value {
        let messages: Vec<Value> = flatten(&request.previous_messages, &request.prompt)
            .into_iter()
            .map(|turn| {
                // Messages API only takes user/assistant turns.
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant | Role::System => "assistant",
                };
                json!({"role": role, "content": turn.content})
            })
            .collect();

        json!({
            "model": request.model,
            "max_tokens": self.settings.max_tokens,
            "messages": messages,
            "stream": true,
        })
    }

    fn call(&self, request: &GenerationRequest) -> UpstreamCall {
        UpstreamCall {
            provider: Provider::Anthropic,
            url: format!("{}/messages", self.settings.base_url_or(ANTHROPIC_API_URL)),
            headers: vec![
                ("x-api-key", self.settings.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: self.build_request_body(request),
        }
    }

    pub async fn open(
        &self,
        request: &GenerationRequest,
    ) -> RelayResult<RawStream<AnthropicEvent>> {
        ensure_model(&self.catalog, Provider::Anthropic, &request.model)?;
        let call = self.call(request);

        open_with_retry(&self.retry, Provider::Anthropic, || {
            let upstream = self.upstream.clone();
            let call = call.clone();
            async move {
                upstream
                    .open(call)
                    .await
                    .map(anthropic_events)
                    .map(leading_error_fails)
            }
        })
        .await
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn send(&self, request: &GenerationRequest) -> RelayResult<CanonicalStream> {
        let raw = self.open(request).await?;
        Ok(normalize::anthropic(raw))
    }
}
