//! Object-storage client construction. Only the credential loading that startup
//! depends on lives here; storage operations are out of scope for this service.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("no credentials file configured")]
    NotConfigured,
    #[error("cannot read credentials file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("credentials file {path} is not valid: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Service-account credentials, as issued by the storage provider.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    pub client_email: String,
    private_key: String,
}

impl std::fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("kind", &self.kind)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStorageClient {
    credentials: ServiceAccountCredentials,
}

impl ObjectStorageClient {
    pub fn from_credentials_file(path: &Path) -> Result<Self, ObjectStorageError> {
        if path.as_os_str().is_empty() {
            return Err(ObjectStorageError::NotConfigured);
        }
        let bytes = std::fs::read(path).map_err(|source| ObjectStorageError::Read { path: path.to_path_buf(), source })?;
        let credentials: ServiceAccountCredentials = serde_json::from_slice(&bytes)
            .map_err(|e| ObjectStorageError::Invalid { path: path.to_path_buf(), reason: e.to_string() })?;
        if credentials.kind != "service_account" {
            return Err(ObjectStorageError::Invalid {
                path: path.to_path_buf(),
                reason: format!("unsupported credential type '{}'", credentials.kind),
            });
        }
        if credentials.private_key.trim().is_empty() {
            return Err(ObjectStorageError::Invalid { path: path.to_path_buf(), reason: "empty private_key".into() });
        }
        Ok(Self { credentials })
    }

    pub fn project_id(&self) -> &str { &self.credentials.project_id }
    pub fn client_email(&self) -> &str { &self.credentials.client_email }
}
