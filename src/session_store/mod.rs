//! Session store contract and its implementations.
//! The gate only ever calls `get`; `set` and `delete` belong to login and logout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::UserId;

mod memory;
mod redis_store;

pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;

/// Server-side state bound to a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub max_age_secs: u64,
}

impl SessionRecord {
    pub fn new(user_id: UserId, max_age: Duration) -> Self {
        Self { user_id, created_at: Utc::now(), max_age_secs: max_age.as_secs() }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("session store unreachable: {0}")]
    Unavailable(String),
    #[error("session store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("session record for token is unreadable: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up the record for `token`. Expired records read as absent.
    async fn get(&self, token: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Write `record` under `token`; the store drops it after `max_age`.
    async fn set(&self, token: &str, record: &SessionRecord, max_age: Duration) -> Result<(), StoreError>;

    /// Remove the record. Returns whether one existed.
    async fn delete(&self, token: &str) -> Result<bool, StoreError>;

    /// Bound applied to a single lookup by callers on the request path.
    fn lookup_timeout(&self) -> Duration;
}
