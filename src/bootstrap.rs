//! Service bootstrap: configuration → session store → relational database →
//! object storage → routes → listener. Any failure aborts startup; there is no
//! degraded mode.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError, DbEnv, StoreBackend};
use crate::identity::PgUserDirectory;
use crate::object_storage::{ObjectStorageClient, ObjectStorageError};
use crate::server::{self, AppState};
use crate::session_store::{MemorySessionStore, RedisSessionStore, SessionStore, StoreError};

const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("session store: {0}")]
    SessionStore(#[from] StoreError),
    #[error("database: {0}")]
    Database(String),
    #[error("object storage: {0}")]
    ObjectStorage(#[from] ObjectStorageError),
    #[error("http state: {0}")]
    State(String),
    #[error("listener on {addr}: {source}")]
    Listen { addr: String, source: std::io::Error },
    #[error("server: {0}")]
    Serve(std::io::Error),
}

/// Every client the service needs, constructed and ready to serve.
pub struct Service {
    pub config: AppConfig,
    pub state: AppState,
    pub db: Arc<tokio_postgres::Client>,
    pub object_storage: ObjectStorageClient,
    _sweeper: Option<Sweeper>,
}

/// The session store picked by `SESSION_STORE`.
pub enum SessionBackend {
    Redis(RedisSessionStore),
    Memory(MemorySessionStore),
}

impl SessionBackend {
    pub fn shared(&self) -> Arc<dyn SessionStore> {
        match self {
            SessionBackend::Redis(s) => Arc::new(s.clone()),
            SessionBackend::Memory(s) => Arc::new(s.clone()),
        }
    }
}

pub async fn connect_session_store(config: &AppConfig) -> Result<SessionBackend, BootstrapError> {
    match config.store_backend {
        StoreBackend::Redis => Ok(SessionBackend::Redis(RedisSessionStore::connect(&config.redis).await?)),
        StoreBackend::Memory => {
            warn!(target: "bootstrap", "using in-process session store; sessions will not survive a restart");
            Ok(SessionBackend::Memory(MemorySessionStore::new(config.redis.timeout)))
        }
    }
}

/// Background task that drops expired records from the in-process store.
/// Aborted when dropped.
pub struct Sweeper(tokio::task::JoinHandle<()>);

impl Sweeper {
    pub fn start(store: MemorySessionStore, every: Duration) -> Self {
        Self(tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                let removed = store.sweep();
                if removed > 0 { tracing::debug!(target: "session", removed, "session sweep"); }
            }
        }))
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub async fn connect_database(env: &DbEnv) -> Result<Arc<tokio_postgres::Client>, BootstrapError> {
    let dsn = env.data_source_name();
    let connect = tokio_postgres::connect(&dsn, tokio_postgres::NoTls);
    let (client, connection) = tokio::time::timeout(DB_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| BootstrapError::Database(format!("connect timed out after {:?}", DB_CONNECT_TIMEOUT)))?
        .map_err(|e| BootstrapError::Database(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(target: "bootstrap", "database connection error: {e}");
        }
    });
    info!(target: "bootstrap", host = %env.base.host, db = %env.name, "database connected");
    Ok(Arc::new(client))
}

/// Build every client in order, failing on the first error.
pub async fn bootstrap(config: AppConfig) -> Result<Service, BootstrapError> {
    info!(
        target: "startup",
        client = %config.client.host,
        backend = %config.backend.host,
        "advertised addresses"
    );
    let backend = connect_session_store(&config).await?;
    let db = connect_database(&config.db).await?;
    let object_storage = ObjectStorageClient::from_credentials_file(&config.object_storage.credentials_path)?;
    info!(target: "bootstrap", project = object_storage.project_id(), "object storage client ready");

    let directory = Arc::new(PgUserDirectory::new(db.clone()));
    let state = AppState::new(backend.shared(), directory, config.cookie_settings(), config.redis.secret.as_bytes())
        .map_err(|e| BootstrapError::State(e.to_string()))?;

    // Started last so a failed startup leaves nothing running.
    let sweeper = match &backend {
        SessionBackend::Memory(store) => Some(Sweeper::start(store.clone(), SWEEP_INTERVAL)),
        SessionBackend::Redis(_) => None,
    };
    Ok(Service { config, state, db, object_storage, _sweeper: sweeper })
}

/// Bootstrap then serve until the process stops.
pub async fn run(config: AppConfig) -> Result<(), BootstrapError> {
    let addr = config.webapp.address();
    let service = bootstrap(config).await?;
    let app = server::router(service.state.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| BootstrapError::Listen { addr: addr.clone(), source })?;
    info!(target: "startup", %addr, "setup complete");
    server::serve(listener, app).await.map_err(BootstrapError::Serve)
}
