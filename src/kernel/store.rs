use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::session::Session;

/// Persistence seam for sessions between turns.
/// The dispatcher never calls it; the transport layer does.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>>;
    async fn save(&self, session_id: &str, session: &Session) -> Result<()>;
    async fn remove(&self, session_id: &str) -> Result<()>;
}

/// In-memory implementation of the session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
