//! Session State Store (§4.G): `GetOrCreate` / `Update` / `Touch` / `Evict`
//! over per-participant session state, with single-writer-per-key discipline
//! and TTL eviction. Uses an `Arc<Mutex<HashMap<Uuid, _>>>` keyed session
//! map with a per-entry lock (so two participants in different sessions
//! never block each other) and a background sweep task for TTL eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::ConfigHandle;
use crate::turn::TurnController;
use crate::voice::types::{ConversationContext, Turn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),
}

/// Everything the Pipeline Orchestrator and Turn Controller need to persist
/// across utterances for one participant (§3 SessionState, GLOSSARY).
pub struct SessionState {
    pub session_id: Uuid,
    pub context: ConversationContext,
    pub turn_controller: TurnController,
    pub turns: Vec<Turn>,
    pub language: Option<String>,
    pub last_touched: Instant,
}

impl SessionState {
    fn new(session_id: Uuid, room_id: Uuid, interruptions_enabled_default: bool) -> Self {
        Self {
            session_id,
            context: ConversationContext::new(session_id, room_id),
            turn_controller: TurnController::new(interruptions_enabled_default),
            turns: Vec::new(),
            language: None,
            last_touched: Instant::now(),
        }
    }
}

struct Entry {
    lock: Mutex<SessionState>,
}

/// Single-writer-per-key session store. Each session's state lives behind
/// its own `tokio::sync::Mutex` so concurrent operations on different
/// sessions never contend; the outer `RwLock<HashMap<..>>` is only held
/// briefly to find or insert that per-session lock.
pub struct SessionStore {
    entries: RwLock<HashMap<Uuid, Arc<Entry>>>,
    config: ConfigHandle,
}

impl SessionStore {
    pub fn new(config: ConfigHandle) -> Arc<Self> {
        Arc::new(Self { entries: RwLock::new(HashMap::new()), config })
    }

    /// Spawn the background TTL sweep (§4.G: "sessions idle past
    /// `session_ttl` are evicted"). Returns the task handle so callers can
    /// abort it on shutdown.
    pub fn spawn_ttl_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.evict_expired().await;
            }
        })
    }

    pub async fn get_or_create(&self, session_id: Uuid, room_id: Uuid) -> Arc<Entry> {
        if let Some(entry) = self.entries.read().await.get(&session_id) {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(session_id)
            .or_insert_with(|| {
                let default_interruptions = self.config.snapshot().interruptions_enabled_default;
                Arc::new(Entry { lock: Mutex::new(SessionState::new(session_id, room_id, default_interruptions)) })
            })
            .clone()
    }

    /// Run `f` against the session's state under its per-session lock,
    /// touching its last-activity timestamp first.
    pub async fn update<F, R>(&self, session_id: Uuid, room_id: Uuid, f: F) -> R
    where
        F: FnOnce(&mut SessionState) -> R,
    {
        let entry = self.get_or_create(session_id, room_id).await;
        let mut state = entry.lock.lock().await;
        state.last_touched = Instant::now();
        f(&mut state)
    }

    pub async fn touch(&self, session_id: Uuid) -> Result<(), SessionError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&session_id).cloned().ok_or(SessionError::NotFound(session_id))?
        };
        entry.lock.lock().await.last_touched = Instant::now();
        Ok(())
    }

    pub async fn evict(&self, session_id: Uuid) {
        self.entries.write().await.remove(&session_id);
    }

    async fn evict_expired(&self) {
        let ttl = self.config.snapshot().session_ttl;
        let expired: Vec<Uuid> = {
            let entries = self.entries.read().await;
            let mut expired = Vec::new();
            for (id, entry) in entries.iter() {
                if entry.lock.lock().await.last_touched.elapsed() >= ttl {
                    expired.push(*id);
                }
            }
            expired
        };
        if !expired.is_empty() {
            let mut entries = self.entries.write().await;
            for id in expired {
                entries.remove(&id);
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn handle() -> ConfigHandle {
        ConfigHandle::new(Config::from_env())
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = SessionStore::new(handle());
        let session_id = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        let a = store.get_or_create(session_id, room_id).await;
        let b = store.get_or_create(session_id, room_id).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_update_mutates_state() {
        let store = SessionStore::new(handle());
        let session_id = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        store
            .update(session_id, room_id, |state| {
                state.language = Some("es".to_string());
            })
            .await;
        let entry = store.get_or_create(session_id, room_id).await;
        assert_eq!(entry.lock.lock().await.language.as_deref(), Some("es"));
    }

    #[tokio::test]
    async fn test_evict_removes_session() {
        let store = SessionStore::new(handle());
        let session_id = Uuid::new_v4();
        store.get_or_create(session_id, Uuid::new_v4()).await;
        assert_eq!(store.session_count().await, 1);
        store.evict(session_id).await;
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_touch_missing_session_errors() {
        let store = SessionStore::new(handle());
        let result = store.touch(Uuid::new_v4()).await;
        assert!(result.is_err());
    }
}
