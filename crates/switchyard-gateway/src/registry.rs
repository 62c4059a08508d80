use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;

/// Bookkeeping for one open connection.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub connected_at: DateTime<Utc>,
}

/// Open-session registry used for health reporting and shutdown draining.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    drained: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. It stays registered until the guard drops.
    pub fn register(self: &Arc<Self>) -> SessionGuard {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                connected_at: Utc::now(),
            },
        );
        SessionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Wait until no session is registered. Returns false if `limit` elapsed first.
    pub async fn wait_drained(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.sessions.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }

    fn remove(&self, id: &str) {
        self.sessions.remove(id);
        self.drained.notify_waiters();
    }
}

/// Removes its session from the registry on drop.
pub struct SessionGuard {
    id: String,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_unregisters_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a.id()).is_some());

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_wait_drained_wakes_on_last_close() {
        let registry = Arc::new(SessionRegistry::new());
        let guard = registry.register();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_drained(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_drained_times_out() {
        let registry = Arc::new(SessionRegistry::new());
        let _guard = registry.register();
        assert!(!registry.wait_drained(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wait_drained_empty_returns_immediately() {
        let registry = SessionRegistry::new();
        assert!(registry.wait_drained(Duration::from_millis(1)).await);
    }
}
