use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::normalize;
use super::provider::{ensure_model, CanonicalStream, ProviderAdapter, ProviderSettings};
use super::streaming::{gemini_events, GeminiChunk, RawStream};
use super::upstream::{Upstream, UpstreamCall};
use crate::catalog::ProviderCatalog;
use crate::error::RelayResult;
use crate::restructure::transcribe;
use crate::retry::{open_with_retry, RetryPolicy};
use crate::types::{GenerationRequest, Provider};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini adapter. History goes up as one transcript prompt.
pub struct GeminiAdapter {
    upstream: Arc<dyn Upstream>,
    catalog: Arc<ProviderCatalog>,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl GeminiAdapter {
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
        let prompt = transcribe(&request.previous_messages, &request.prompt);
        json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"maxOutputTokens": self.settings.max_tokens},
        })
    }

    fn call(&self, request: &GenerationRequest) -> UpstreamCall {
        UpstreamCall {
            provider: Provider::Gemini,
            url: format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.settings.base_url_or(GEMINI_API_URL),
                request.model
            ),
            headers: vec![("x-goog-api-key", self.settings.api_key.clone())],
            body: self.build_request_body(request),
        }
    }

    pub async fn open(&self, request: &GenerationRequest) -> RelayResult<RawStream<GeminiChunk>> {
        ensure_model(&self.catalog, Provider::Gemini, &request.model)?;
        let call = self.call(request);

        open_with_retry(&self.retry, Provider::Gemini, || {
            let upstream = self.upstream.clone();
            let call = call.clone();
            async move { upstream.open(call).await.map(gemini_events) }
        })
        .await
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn send(&self, request: &GenerationRequest) -> RelayResult<CanonicalStream> {
        let raw = self.open(request).await?;
        Ok(normalize::gemini(raw))
    }
}
