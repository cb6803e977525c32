//! User lookup capability used by the login path.
//! Kept to a single method so tests can substitute the in-memory directory.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;

use super::principal::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user directory query failed: {0}")]
    Query(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;
}

pub fn hash_password(password: &str) -> Result<String, DirectoryError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| DirectoryError::Hash(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| DirectoryError::Hash(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| DirectoryError::Hash(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Directory held in memory; for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self { Self::default() }

    pub fn add_user(&self, id: UserId, username: &str, password: &str) -> Result<(), DirectoryError> {
        let rec = UserRecord { id, username: username.to_string(), password_hash: hash_password(password)? };
        self.users.write().insert(username.to_string(), rec);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users.read().get(username).cloned())
    }
}

/// Directory backed by the relational `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    client: Arc<tokio_postgres::Client>,
}

const USER_BY_USERNAME: &str = "SELECT id, username, password_hash FROM users WHERE username = $1";

impl PgUserDirectory {
    pub fn new(client: Arc<tokio_postgres::Client>) -> Self { Self { client } }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let row = self
            .client
            .query_opt(USER_BY_USERNAME, &[&username])
            .await
            .map_err(|e| DirectoryError::Query(e.to_string()))?;
        let Some(row) = row else { return Ok(None); };
        let id: i64 = row.try_get("id").map_err(|e| DirectoryError::Query(e.to_string()))?;
        let id = u64::try_from(id).map_err(|_| DirectoryError::Query(format!("negative user id {}", id)))?;
        Ok(Some(UserRecord {
            id: UserId(id),
            username: row.try_get("username").map_err(|e| DirectoryError::Query(e.to_string()))?,
            password_hash: row.try_get("password_hash").map_err(|e| DirectoryError::Query(e.to_string()))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let phc = hash_password("hunter2").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "hunter2"));
        assert!(!verify_password(&phc, "hunter3"));
        assert!(!verify_password("not-a-phc", "hunter2"));
    }

    #[tokio::test]
    async fn memory_directory_lookup() {
        let dir = MemoryUserDirectory::new();
        dir.add_user(UserId(42), "ada", "pw").unwrap();
        let rec = dir.user_by_username("ada").await.unwrap().unwrap();
        assert_eq!(rec.id, UserId(42));
        assert!(dir.user_by_username("bob").await.unwrap().is_none());
    }
}
