pub mod anthropic;
pub mod gemini;
pub mod normalize;
pub mod openai;
pub mod provider;
pub mod streaming;
pub mod upstream;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAIAdapter;
pub use provider::{CanonicalStream, ProviderAdapter, ProviderSettings, DEFAULT_MAX_TOKENS};
pub use streaming::{parse_anthropic_sse, parse_gemini_sse, parse_openai_sse, RawStream};
pub use upstream::{ByteStream, HttpUpstream, Upstream, UpstreamCall};
