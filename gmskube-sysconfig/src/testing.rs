//! In-memory central store for repository and resolver tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use crate::backend::{KvBackend, LOCK_RETRY_DELAY, LOCK_WAIT, LockGuard, lock_key};
use crate::error::{Error, Result};

/// In-process backend holding everything in a map.
///
/// Counts transactions so callers can observe how writes were batched, and
/// can be told to fail writes to one key.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    leases: Mutex<BTreeMap<String, Instant>>,
    fail_put_key: Mutex<Option<String>>,
    transactions: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let backend = Self::default();
        if let Ok(mut map) = backend.entries.lock() {
            map.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        }
        backend
    }

    /// Make every subsequent `put` of `key` fail.
    pub fn fail_puts_to(&self, key: impl Into<String>) {
        if let Ok(mut slot) = self.fail_put_key.lock() {
            *slot = Some(key.into());
        }
    }

    /// Number of write transactions committed so far.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries.lock().map_err(|_| Error::Backend {
            message: "memory backend poisoned".to_string(),
        })
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.entries()?.clone())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let should_fail = self
            .fail_put_key
            .lock()
            .map(|slot| slot.as_deref() == Some(key))
            .unwrap_or(false);
        if should_fail {
            return Err(Error::Backend {
                message: format!("write of '{key}' rejected"),
            });
        }

        self.entries()?.insert(key.to_string(), value.to_string());
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_all(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries()?;
        for key in keys {
            entries.remove(key);
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lock(&self, name: &str, lease: Duration) -> Result<LockGuard> {
        let key = lock_key(name);
        let deadline = Instant::now() + LOCK_WAIT;

        loop {
            let acquired = {
                let mut leases = self.leases.lock().map_err(|_| Error::Backend {
                    message: "memory backend poisoned".to_string(),
                })?;
                let now = Instant::now();
                match leases.get(&key) {
                    Some(expiry) if *expiry > now => false,
                    _ => {
                        leases.insert(key.clone(), now + lease);
                        true
                    }
                }
            };

            if acquired {
                let token = uuid::Uuid::new_v4().to_string();
                self.entries()?.insert(key, token.clone());
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
        let key = lock_key(&guard.name);
        let mut entries = self.entries()?;
        if entries.get(&key) == Some(&guard.token) {
            entries.remove(&key);
            if let Ok(mut leases) = self.leases.lock() {
                leases.remove(&key);
            }
        }
        Ok(())
    }
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let backend = MemoryBackend::new();
        let guard = backend.lock("put_lock", Duration::from_secs(30)).await.unwrap();
        assert!(backend.get("/locks/put_lock").await.unwrap().is_some());

        backend.unlock(guard).await.unwrap();
        assert!(backend.get("/locks/put_lock").await.unwrap().is_none());

        // A fresh acquisition succeeds once released
        let again = backend.lock("put_lock", Duration::from_secs(30)).await;
        assert!(again.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_lock_times_out() {
        let backend = MemoryBackend::new();
        let _held = backend.lock("put_lock", Duration::from_secs(60)).await.unwrap();

        let err = backend
            .lock("put_lock", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let backend = MemoryBackend::new();
        let _stale = backend.lock("put_lock", Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.lock("put_lock", Duration::from_secs(30)).await.is_ok());
    }
}
