use crate::config::Config;
use anyhow::{Context, Result};
use std::path::PathBuf;
use switchyard_runtime::{ConversationStore, SqliteConversationStore};

pub fn execute(db: Option<PathBuf>, json: bool, config: &Config) -> Result<()> {
    let path = db.unwrap_or_else(|| config.storage.db_path.clone());
    if !path.exists() {
        anyhow::bail!("No conversation store at {:?}", path);
    }

    let store = SqliteConversationStore::open(&path)
        .with_context(|| format!("Failed to open conversation store {:?}", path))?;
    let conversations = store.list_conversations()?;

    if json {
        for conversation in &conversations {
            println!("{}", serde_json::to_string(conversation)?);
        }
        return Ok(());
    }

    if conversations.is_empty() {
        println!("No conversations");
        return Ok(());
    }
    for conversation in conversations {
        println!(
            "{:>6}  {}  {}",
            conversation.id,
            conversation.created_at.format("%Y-%m-%d %H:%M:%S"),
            conversation.name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
