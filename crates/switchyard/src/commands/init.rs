use anyhow::{Context, Result};
use std::path::Path;

pub const DEFAULT_CONFIG: &str = r#"# Switchyard Configuration

[server]
host = "127.0.0.1"
port = 8080
max_message_bytes = 50000
drain_timeout_secs = 10
send_timeout_secs = 5
allowed_origins = []

[relay]
retry_attempts = 3
retry_delay_ms = 2000
generation_timeout_secs = 300
history_limit = 20

# api_key falls back to OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY (or GOOGLE_API_KEY).
# Set `models = [...]` to replace a provider's built-in model list.
[providers.openai]
max_tokens = 2048

[providers.anthropic]
max_tokens = 2048

[providers.gemini]
max_tokens = 2048

[storage]
enabled = false
db_path = "switchyard.db"
"#;

/// Initialize a new config file
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {:?}", path);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {:?}", path))?;
    println!("Created config at {:?}", path);
    Ok(())
}
