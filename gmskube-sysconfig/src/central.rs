//! Central configuration repository.
//!
//! Wraps a networked [`KvBackend`]. Writers serialize on a named lock with a
//! bounded lease; readers never take the lock. When the store cannot be
//! reached at construction the repository is kept as "unavailable" and every
//! read answers "no value".

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::{KvBackend, is_lock_key};
use crate::error::{Error, Result};
use crate::redis_backend::RedisBackend;
use crate::repository::ConfigRepository;

/// Lock taken by every writer.
pub const PUT_LOCK_NAME: &str = "put_lock";

/// Lease on [`PUT_LOCK_NAME`]; a crashed writer frees the lock after this.
pub const LOCK_LEASE: Duration = Duration::from_secs(30);

pub const DEFAULT_ENDPOINTS: &str = "sysconfig:6379";
pub const DEFAULT_PORT: u16 = 6379;

/// Connection settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct CentralSettings {
    /// Comma-separated `host[:port]` list; only the first entry is used.
    pub endpoints: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for CentralSettings {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.to_string(),
            username: None,
            password: None,
        }
    }
}

impl CentralSettings {
    /// Host and port of the first configured endpoint
    pub fn first_endpoint(&self) -> Result<(String, u16)> {
        let first = self.endpoints.split(',').next().unwrap_or("").trim();
        if first.is_empty() {
            return Err(Error::MissingSetting { what: "endpoints" });
        }

        match first.split_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| Error::InvalidEndpoint {
                    endpoint: first.to_string(),
                })?;
                Ok((host.to_string(), port))
            }
            None => Ok((first.to_string(), DEFAULT_PORT)),
        }
    }
}

pub struct CentralRepository {
    endpoints: String,
    backend: Option<Arc<dyn KvBackend>>,
}

impl CentralRepository {
    /// Connect to the configured store.
    ///
    /// Missing credentials are an error. An unreachable store is not: it is
    /// logged and the repository degrades to "no value" for every read.
    pub async fn connect(settings: &CentralSettings) -> Result<Self> {
        let username = settings
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(Error::MissingSetting { what: "user" })?;
        let password = settings
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(Error::MissingSetting { what: "password" })?;
        let (host, port) = settings.first_endpoint()?;

        match RedisBackend::connect(&host, port, username, password).await {
            Ok(backend) => Ok(Self::with_backend(&settings.endpoints, Arc::new(backend))),
            Err(e) => {
                warn!(
                    "Central system configuration unreachable at endpoint '{}': {e}",
                    settings.endpoints
                );
                Ok(Self::unavailable(&settings.endpoints))
            }
        }
    }

    pub fn with_backend(endpoints: &str, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            endpoints: endpoints.to_string(),
            backend: Some(backend),
        }
    }

    pub fn unavailable(endpoints: &str) -> Self {
        Self {
            endpoints: endpoints.to_string(),
            backend: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn endpoints(&self) -> &str {
        &self.endpoints
    }

    fn backend(&self) -> Result<&Arc<dyn KvBackend>> {
        self.backend.as_ref().ok_or_else(|| Error::Unavailable {
            endpoints: self.endpoints.clone(),
        })
    }

    /// Set a literal key under the writer lock
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let backend = self.backend()?;
        debug!("[sysconfig] setting {key} to {value}");

        let guard = backend.lock(PUT_LOCK_NAME, LOCK_LEASE).await?;
        let result = backend.put(key, value).await;
        release(backend.as_ref(), guard).await;
        result
    }

    /// Delete a literal key under the writer lock
    pub async fn delete(&self, key: &str) -> Result<()> {
        let backend = self.backend()?;
        debug!("[sysconfig] deleting {key}");

        let guard = backend.lock(PUT_LOCK_NAME, LOCK_LEASE).await?;
        let result = backend.delete(key).await;
        release(backend.as_ref(), guard).await;
        result
    }

    /// Import key/value pairs, optionally clearing existing keys first.
    ///
    /// Runs under the writer lock. Clearing happens in one transaction and
    /// leaves lock keys alone; each pair is then written in its own
    /// transaction. Any failure aborts the load with [`Error::LoadAborted`];
    /// keys already written stay written.
    pub async fn load(&self, values: &BTreeMap<String, String>, clear: bool) -> Result<()> {
        let backend = self.backend()?;

        let guard = backend
            .lock(PUT_LOCK_NAME, LOCK_LEASE)
            .await
            .map_err(|e| abort(PUT_LOCK_NAME, e))?;
        let result = load_locked(backend.as_ref(), values, clear).await;
        release(backend.as_ref(), guard).await;
        result
    }
}

async fn load_locked(
    backend: &dyn KvBackend,
    values: &BTreeMap<String, String>,
    clear: bool,
) -> Result<()> {
    if clear {
        let existing: Vec<String> = backend
            .get_all()
            .await
            .map_err(|e| abort("<clear>", e))?
            .into_keys()
            .filter(|k| !is_lock_key(k))
            .collect();
        for key in &existing {
            debug!("[sysconfig] clearing '{key}'");
        }
        backend
            .delete_all(&existing)
            .await
            .map_err(|e| abort("<clear>", e))?;
    }

    for (key, value) in values {
        debug!("[sysconfig] setting '{key}' = '{value}'");
        backend.put(key, value).await.map_err(|e| abort(key, e))?;
    }

    Ok(())
}

fn abort(key: &str, source: Error) -> Error {
    Error::LoadAborted {
        key: key.to_string(),
        source: Box::new(source),
    }
}

async fn release(backend: &dyn KvBackend, guard: crate::backend::LockGuard) {
    let name = guard.name.clone();
    if let Err(e) = backend.unlock(guard).await {
        // The lease expires on its own
        warn!("Failed to release lock '{name}': {e}");
    }
}

#[async_trait]
impl ConfigRepository for CentralRepository {
    fn name(&self) -> &str {
        "central"
    }

    async fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        debug!("[sysconfig] looking for {key}");
        match backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!("[sysconfig] lookup of {key} failed: {e}");
                None
            }
        }
    }

    async fn export(&self) -> BTreeMap<String, String> {
        let Some(backend) = self.backend.as_ref() else {
            warn!(
                "Central configuration repository unavailable at endpoint '{}'",
                self.endpoints
            );
            return BTreeMap::new();
        };

        match backend.get_all().await {
            Ok(all) => all.into_iter().filter(|(k, _)| !is_lock_key(k)).collect(),
            Err(e) => {
                warn!(
                    "Central configuration repository unavailable at endpoint '{}': {e}",
                    self.endpoints
                );
                BTreeMap::new()
            }
        }
    }
}
