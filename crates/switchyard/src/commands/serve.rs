use crate::config::Config;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use switchyard_gateway::{start_server, AppState};
use switchyard_runtime::{HttpUpstream, RequestRouter, SqliteConversationStore};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn execute(host: Option<String>, port: Option<u16>, config: &Config) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    info!(host = %host, port, "Starting relay server");

    let catalog = Arc::new(config.catalog()?);
    let settings = config.provider_settings();
    for (provider, s) in &settings {
        if s.api_key.is_empty() {
            warn!(
                provider = %provider,
                "No API key configured, requests will be rejected upstream"
            );
        }
    }

    let upstream = Arc::new(HttpUpstream::new(CONNECT_TIMEOUT)?);
    let router = RequestRouter::standard(catalog, upstream, settings, config.retry_policy());

    let mut state = AppState::new(router, config.relay_settings())
        .with_allowed_origins(config.server.allowed_origins.clone());

    if config.storage.enabled {
        let store = SqliteConversationStore::open(&config.storage.db_path).with_context(|| {
            format!("Failed to open conversation store {:?}", config.storage.db_path)
        })?;
        info!(path = ?config.storage.db_path, "Conversation store enabled");
        state = state.with_store(Arc::new(store));
    }

    start_server(state, &host, port).await
}
