pub mod catalog;
pub mod error;
pub mod llm;
pub mod restructure;
pub mod retry;
pub mod router;
pub mod storage;
pub mod types;

pub use catalog::ProviderCatalog;
pub use error::{close_code, RelayError, RelayResult};
pub use llm::{
    AnthropicAdapter, CanonicalStream, GeminiAdapter, HttpUpstream, OpenAIAdapter,
    ProviderAdapter, ProviderSettings, Upstream, UpstreamCall,
};
pub use retry::RetryPolicy;
pub use router::RequestRouter;
pub use storage::{Conversation, ConversationStore, SqliteConversationStore, StoredMessage};
pub use types::{
    CanonicalEvent, ChatMessage, ErrorContent, GenerationRequest, Provider, Role, StreamEnd,
    StreamItem,
};

/// Initialize structured JSON logging. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().json().with_env_filter(filter).init();
}
