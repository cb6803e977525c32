//!
//! Environment resolver
//! --------------------
//! Reads process configuration into typed structs once at startup. Resolution is a
//! pure function over a lookup closure; `AppConfig::from_env` binds it to the real
//! process environment (after `.env` has been loaded by the binary).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// One day, the reference max-age of a session cookie and record.
pub const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 86_400;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SESSION_COOKIE: &str = "session";
/// `axum_extra`'s key derivation refuses shorter master keys.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseEnv {
    pub host: String,
    pub port: String,
}

impl BaseEnv {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RedisEnv {
    /// Name of the session cookie.
    pub session_key: String,
    pub max_conn: usize,
    pub secret: String,
    /// Upper bound on any single store round-trip.
    pub timeout: Duration,
    pub base: BaseEnv,
}

impl RedisEnv {
    pub fn url(&self) -> String {
        format!("redis://{}/", self.base.address())
    }
}

// Hand-written so the secret never reaches a log line.
impl std::fmt::Debug for RedisEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEnv")
            .field("session_key", &self.session_key)
            .field("max_conn", &self.max_conn)
            .field("secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("base", &self.base)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct DbEnv {
    pub user: String,
    pub password: String,
    pub name: String,
    pub base: BaseEnv,
}

impl DbEnv {
    /// libpq key/value connection string.
    pub fn data_source_name(&self) -> String {
        format!(
            "host={} user={} password={} dbname={} port={}",
            self.base.host, self.user, self.password, self.name, self.base.port
        )
    }
}

impl std::fmt::Debug for DbEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbEnv")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("base", &self.base)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStorageEnv {
    pub credentials_path: PathBuf,
}

/// Which session store implementation backs the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// In-process store; sessions die with the process.
    Memory,
}

/// Attributes stamped on every session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub max_age: Duration,
    pub secure: bool,
    pub http_only: bool,
}

impl CookieSettings {
    pub fn new(name: impl Into<String>, max_age: Duration) -> Self {
        Self { name: name.into(), max_age, secure: true, http_only: true }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE, Duration::from_secs(DEFAULT_SESSION_MAX_AGE_SECS))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis: RedisEnv,
    pub store_backend: StoreBackend,
    pub session_max_age: Duration,
    pub db: DbEnv,
    pub object_storage: ObjectStorageEnv,
    pub webapp: BaseEnv,
    /// Advertised frontend origin, logged at startup.
    pub client: BaseEnv,
    pub backend: BaseEnv,
}

impl AppConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).unwrap_or_default();

        let max_conn = parse_required::<usize, _>(&lookup, "REDIS_MAX_CONNECTIONS")?;
        if max_conn == 0 {
            return Err(ConfigError::Invalid { var: "REDIS_MAX_CONNECTIONS", reason: "must be greater than zero".into() });
        }
        if max_conn > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid {
                var: "REDIS_MAX_CONNECTIONS",
                reason: format!("must be at most {}", tokio::sync::Semaphore::MAX_PERMITS),
            });
        }
        let secret = lookup("REDIS_SECRET_KEY").filter(|s| !s.is_empty()).ok_or(ConfigError::Missing("REDIS_SECRET_KEY"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "REDIS_SECRET_KEY",
                reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
        let timeout_ms = parse_or::<u64, _>(&lookup, "REDIS_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;
        let session_key = lookup("REDIS_SESSION_KEY")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());

        let redis = RedisEnv {
            session_key,
            max_conn,
            secret,
            timeout: Duration::from_millis(timeout_ms),
            base: BaseEnv { host: get("REDISHOST"), port: get("REDISPORT") },
        };

        let store_backend = match lookup("SESSION_STORE").map(|s| s.to_lowercase()).as_deref() {
            None | Some("") | Some("redis") => StoreBackend::Redis,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid { var: "SESSION_STORE", reason: format!("unknown backend '{}'", other) })
            }
        };

        let max_age_secs = parse_or::<u64, _>(&lookup, "SESSION_MAX_AGE_SECS", DEFAULT_SESSION_MAX_AGE_SECS)?;
        if max_age_secs == 0 {
            return Err(ConfigError::Invalid { var: "SESSION_MAX_AGE_SECS", reason: "must be greater than zero".into() });
        }

        let db = DbEnv {
            user: get("DB_USER"),
            password: get("DB_PASSWORD"),
            name: get("DB_NAME"),
            base: BaseEnv { host: get("DB_HOST"), port: get("DB_PORT") },
        };

        let object_storage = ObjectStorageEnv {
            credentials_path: PathBuf::from(get("GOOGLE_APPLICATION_CREDENTIALS")),
        };

        Ok(Self {
            redis,
            store_backend,
            session_max_age: Duration::from_secs(max_age_secs),
            db,
            object_storage,
            webapp: BaseEnv { host: get("WEBAPP_ADDRESS"), port: get("WEBAPP_PORT") },
            client: BaseEnv { host: get("CLIENT_HOST"), port: get("CLIENT_PORT") },
            backend: BaseEnv { host: get("BACKEND_HOST"), port: get("BACKEND_PORT") },
        })
    }

    /// Connection settings for the test database (`DB_TEST_*`).
    pub fn test_db_from_lookup<F>(lookup: F) -> DbEnv
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).unwrap_or_default();
        DbEnv {
            user: get("DB_TEST_USER"),
            password: get("DB_TEST_PASSWORD"),
            name: get("DB_TEST_NAME"),
            base: BaseEnv { host: get("DB_TEST_HOST"), port: get("DB_TEST_PORT") },
        }
    }

    pub fn cookie_settings(&self) -> CookieSettings {
        CookieSettings::new(self.redis.session_key.clone(), self.session_max_age)
    }
}

fn parse_required<T, F>(lookup: &F, var: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(var).ok_or(ConfigError::Missing(var))?;
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid { var, reason: e.to_string() })
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid { var, reason: e.to_string() })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
