use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{SessionRecord, SessionStore, StoreError};

#[derive(Clone)]
struct Entry {
    record: SessionRecord,
    expires_at: Instant,
}

/// In-process session store with per-entry expiry.
/// Reads never mutate the map; expired entries are dropped by `sweep`.
#[derive(Clone)]
pub struct MemorySessionStore {
    map: Arc<RwLock<HashMap<String, Entry>>>,
    timeout: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self { Self::new(Duration::from_millis(crate::config::DEFAULT_STORE_TIMEOUT_MS)) }
}

impl MemorySessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self { map: Arc::new(RwLock::new(HashMap::new())), timeout }
    }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Snapshot of the stored record, ignoring expiry.
    pub fn peek(&self, token: &str) -> Option<SessionRecord> {
        self.map.read().get(token).map(|e| e.record.clone())
    }

    /// Remove expired entries. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, e| e.expires_at > now);
        before - w.len()
    }

    /// Drop every session bound to `user`. Returns number removed.
    pub fn revoke_user(&self, user: crate::identity::UserId) -> usize {
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, e| e.record.user_id != user);
        let removed = before - w.len();
        tracing::info!(target: "session", user = %user, removed, "sessions revoked");
        removed
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        let r = self.map.read();
        Ok(r.get(token).filter(|e| Instant::now() < e.expires_at).map(|e| e.record.clone()))
    }

    async fn set(&self, token: &str, record: &SessionRecord, max_age: Duration) -> Result<(), StoreError> {
        let ent = Entry { record: record.clone(), expires_at: Instant::now() + max_age };
        self.map.write().insert(token.to_string(), ent);
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.map.write().remove(token).is_some())
    }

    fn lookup_timeout(&self) -> Duration { self.timeout }
}
