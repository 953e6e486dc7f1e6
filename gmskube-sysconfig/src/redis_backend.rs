//! Redis-backed central store.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use snafu::ResultExt;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::backend::{KvBackend, LOCK_RETRY_DELAY, LOCK_WAIT, LockGuard, lock_key};
use crate::error::{Error, Result, StoreSnafu};

/// Upper bound on establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Compare-and-delete so a writer only ever releases its own lease.
const UNLOCK_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `host:port` with the given credentials
    pub async fn connect(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let url = format!(
            "redis://{}:{}@{}:{}/",
            urlencoding::encode(username),
            urlencoding::encode(password),
            host,
            port
        );
        debug!("[sysconfig] connecting to server on '{host}:{port}' as user '{username}'");

        let client = redis::Client::open(url.as_str()).context(StoreSnafu)?;
        let conn = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Unavailable {
                endpoints: format!("{host}:{port}"),
            })?
            .context(StoreSnafu)?;

        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .context(StoreSnafu)
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        let mut conn = self.conn();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("*")
            .query_async(&mut conn)
            .await
            .context(StoreSnafu)?;
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .context(StoreSnafu)?;

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        redis::pipe()
            .atomic()
            .set(key, value)
            .ignore()
            .query_async::<()>(&mut self.conn())
            .await
            .context(StoreSnafu)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut self.conn())
            .await
            .context(StoreSnafu)
    }

    async fn delete_all(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.del(key).ignore();
        }
        pipe.query_async::<()>(&mut self.conn())
            .await
            .context(StoreSnafu)
    }

    async fn lock(&self, name: &str, lease: Duration) -> Result<LockGuard> {
        let key = lock_key(name);
        let token = uuid::Uuid::new_v4().to_string();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);
        let deadline = Instant::now() + LOCK_WAIT;
        let mut conn = self.conn();

        loop {
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await
                .context(StoreSnafu)?;

            if reply.is_some() {
                return Ok(LockGuard {
                    name: name.to_string(),
                    token,
                });
            }

            if Instant::now() >= deadline {
                return Err(Error::LockTimeout {
                    name: name.to_string(),
                    waited: LOCK_WAIT,
                });
            }
            sleep(LOCK_RETRY_DELAY).await;
        }
    }

    async fn unlock(&self, guard: LockGuard) -> Result<()> {
        redis::Script::new(UNLOCK_SCRIPT)
            .key(lock_key(&guard.name))
            .arg(&guard.token)
            .invoke_async::<i64>(&mut self.conn())
            .await
            .context(StoreSnafu)?;
        Ok(())
    }
}
