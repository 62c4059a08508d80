use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::ProviderCatalog;
use crate::error::{RelayError, RelayResult};
use crate::llm::{
    AnthropicAdapter, GeminiAdapter, OpenAIAdapter, ProviderAdapter, ProviderSettings, Upstream,
};
use crate::retry::RetryPolicy;
use crate::types::Provider;

/// Selects the adapter for a model by catalog membership.
#[derive(Clone)]
pub struct RequestRouter {
    catalog: Arc<ProviderCatalog>,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl RequestRouter {
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        Self {
            catalog,
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter under its own provider family, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Router with the three HTTP adapters sharing one upstream.
    pub fn standard(
        catalog: Arc<ProviderCatalog>,
        upstream: Arc<dyn Upstream>,
        mut settings: HashMap<Provider, ProviderSettings>,
        retry: RetryPolicy,
    ) -> Self {
        let mut take = |provider: Provider| {
            settings
                .remove(&provider)
                .unwrap_or_else(|| ProviderSettings::new(""))
        };

        let openai = OpenAIAdapter::new(upstream.clone(), catalog.clone(), take(Provider::OpenAI))
            .with_retry(retry);
        let anthropic =
            AnthropicAdapter::new(upstream.clone(), catalog.clone(), take(Provider::Anthropic))
                .with_retry(retry);
        let gemini = GeminiAdapter::new(upstream, catalog.clone(), take(Provider::Gemini))
            .with_retry(retry);

        Self::new(catalog)
            .with_adapter(Arc::new(openai))
            .with_adapter(Arc::new(anthropic))
            .with_adapter(Arc::new(gemini))
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    /// Adapter for `model`, checked in the order OpenAI, Anthropic, Gemini.
    pub fn route(&self, model: &str) -> RelayResult<Arc<dyn ProviderAdapter>> {
        if model.is_empty() {
            return Err(RelayError::payload("model must be a non-empty string"));
        }

        let provider = self
            .catalog
            .provider_for(model)
            .ok_or_else(|| RelayError::UnknownModel(model.to_string()))?;

        self.adapters.get(&provider).cloned().ok_or_else(|| {
            RelayError::internal(format!("no adapter registered for {}", provider))
        })
    }
}
