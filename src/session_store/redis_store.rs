use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{SessionRecord, SessionStore, StoreError};
use crate::config::RedisEnv;

const KEY_PREFIX: &str = "session_";

/// Redis-backed session store.
///
/// The connection manager multiplexes one reconnecting connection; a semaphore
/// sized by `REDIS_MAX_CONNECTIONS` caps the number of in-flight commands, and
/// every command (including the wait for a permit) is bounded by the configured
/// timeout.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub(crate) fn record_key(token: &str) -> String {
    format!("{}{}", KEY_PREFIX, token)
}

pub(crate) fn encode_record(record: &SessionRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn decode_record(raw: &str) -> Result<SessionRecord, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl RedisSessionStore {
    /// Open the client and verify the server answers a PING within the timeout.
    pub async fn connect(env: &RedisEnv) -> Result<Self, StoreError> {
        let client = redis::Client::open(env.url())?;
        let conn = tokio::time::timeout(env.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(env.timeout))??;
        let store = Self { conn, permits: Arc::new(Semaphore::new(env.max_conn)), timeout: env.timeout };
        let _pong: String = store
            .bounded(|mut c| async move { redis::cmd("PING").query_async(&mut c).await })
            .await?;
        info!(target: "session", address = %env.base.address(), max_conn = env.max_conn, "redis session store connected");
        Ok(store)
    }

    async fn bounded<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| StoreError::Unavailable("connection pool closed".into()))?;
            op(self.conn.clone()).await.map_err(StoreError::from)
        };
        tokio::time::timeout(self.timeout, work).await.map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        let key = record_key(token);
        let raw: Option<String> = self.bounded(move |mut c| async move { c.get(key).await }).await?;
        raw.as_deref().map(decode_record).transpose()
    }

    async fn set(&self, token: &str, record: &SessionRecord, max_age: Duration) -> Result<(), StoreError> {
        let key = record_key(token);
        let value = encode_record(record)?;
        let secs = max_age.as_secs().max(1);
        self.bounded(move |mut c| async move { c.set_ex::<_, _, ()>(key, value, secs).await }).await?;
        debug!(target: "session", user = %record.user_id, ttl_secs = secs, "session record written");
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<bool, StoreError> {
        let key = record_key(token);
        let removed: i64 = self.bounded(move |mut c| async move { c.del(key).await }).await?;
        Ok(removed > 0)
    }

    fn lookup_timeout(&self) -> Duration { self.timeout }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseEnv;
    use crate::identity::UserId;

    #[test]
    fn keys_carry_session_prefix() {
        assert_eq!(record_key("abc123"), "session_abc123");
    }

    #[test]
    fn record_wire_format_uses_user_id_field() {
        let rec = SessionRecord::new(UserId(42), Duration::from_secs(86_400));
        let raw = encode_record(&rec).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["userID"], 42);
        assert_eq!(v["max_age_secs"], 86_400);
        assert_eq!(decode_record(&raw).unwrap(), rec);
    }

    #[test]
    fn garbage_record_is_corrupt() {
        assert!(matches!(decode_record("not json"), Err(StoreError::Corrupt(_))));
    }

    /// Answers every command with `+OK` except `GET`, which never gets a reply.
    async fn answer_all_but_get(stream: tokio::net::TcpStream) {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        let (r, mut w) = stream.into_split();
        let mut lines = BufReader::new(r).lines();
        while let Ok(Some(header)) = lines.next_line().await {
            let Some(argc) = header.strip_prefix('*').and_then(|n| n.parse::<usize>().ok()) else { continue };
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                // `$len` then the argument itself
                let (Ok(Some(_)), Ok(Some(arg))) = (lines.next_line().await, lines.next_line().await) else { return };
                args.push(arg);
            }
            if args.first().is_some_and(|c| c.eq_ignore_ascii_case("GET")) {
                std::future::pending::<()>().await;
            }
            if w.write_all(b"+OK\r\n").await.is_err() {
                return;
            }
        }
    }

    async fn stalling_server() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer_all_but_get(stream));
            }
        });
        port
    }

    #[tokio::test]
    async fn stalled_server_times_out_commands_and_permit_waits() {
        let port = stalling_server().await;
        let bound = Duration::from_millis(300);
        let env = RedisEnv {
            session_key: "session".into(),
            max_conn: 1,
            secret: "x".repeat(32),
            timeout: bound,
            base: BaseEnv { host: "127.0.0.1".into(), port: port.to_string() },
        };
        let store = RedisSessionStore::connect(&env).await.unwrap();

        // The second lookup queues behind the only permit and is bounded too.
        let started = std::time::Instant::now();
        let (a, b) = tokio::join!(store.get("stalled"), store.get("queued"));
        assert_eq!(a, Err(StoreError::Timeout(bound)));
        assert_eq!(b, Err(StoreError::Timeout(bound)));
        assert!(started.elapsed() < Duration::from_secs(2));

        let gate = crate::identity::AuthGate::new(Arc::new(store));
        let handle = crate::identity::SessionHandle { token: "stalled".into(), user_id: UserId(42) };
        assert!(matches!(
            gate.authenticate(Some(&handle)).await,
            Err(crate::identity::AuthError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_fails_within_bound() {
        // Port 1 on loopback refuses connections on any sane host.
        let env = RedisEnv {
            session_key: "session".into(),
            max_conn: 2,
            secret: "x".repeat(32),
            timeout: Duration::from_millis(500),
            base: BaseEnv { host: "127.0.0.1".into(), port: "1".into() },
        };
        let started = std::time::Instant::now();
        assert!(RedisSessionStore::connect(&env).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
