//! Storage backends for the central configuration repository.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Keys under this prefix hold locks and are never exported or cleared.
pub const LOCK_PREFIX: &str = "/locks";

/// How long a writer waits for a contended lock before giving up.
pub const LOCK_WAIT: Duration = Duration::from_secs(10);

pub(crate) const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

#[must_use]
pub fn lock_key(name: &str) -> String {
    format!("{LOCK_PREFIX}/{name}")
}

#[must_use]
pub fn is_lock_key(key: &str) -> bool {
    key.starts_with(LOCK_PREFIX)
}

/// Proof that a named lock is held; pass back to [`KvBackend::unlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub name: String,
    pub token: String,
}

/// Primitive operations a central key/value store must offer.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// All stored pairs, lock keys included.
    async fn get_all(&self) -> Result<BTreeMap<String, String>>;

    /// Write one key in its own transaction.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key in `keys` in a single transaction.
    async fn delete_all(&self, keys: &[String]) -> Result<()>;

    /// Acquire the named lock with a bounded lease.
    async fn lock(&self, name: &str, lease: Duration) -> Result<LockGuard>;

    async fn unlock(&self, guard: LockGuard) -> Result<()>;
}
