use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::catalog::ProviderCatalog;
use crate::error::{RelayError, RelayResult};
use crate::types::{GenerationRequest, Provider, StreamItem};

pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Normalized events for one generation, ending in exactly one `StreamItem::End`.
pub type CanonicalStream = BoxStream<'static, StreamItem>;

/// Provider adapter - one per provider family, selected by the router.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Start a streamed generation.
    ///
    /// Fails only if the call cannot be started (bad model, retries exhausted).
    /// Everything after the first fragment is reported inside the stream.
    async fn send(&self, request: &GenerationRequest) -> RelayResult<CanonicalStream>;
}

/// Credentials and limits for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
}

impl ProviderSettings {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub(crate) fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }
}

/// Reject a model outside this provider's catalog entry.
pub(crate) fn ensure_model(
    catalog: &ProviderCatalog,
    provider: Provider,
    model: &str,
) -> RelayResult<()> {
    if catalog.contains(provider, model) {
        Ok(())
    } else {
        Err(RelayError::InvalidModel {
            provider,
            model: model.to_string(),
        })
    }
}
