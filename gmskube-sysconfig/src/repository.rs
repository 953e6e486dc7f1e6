use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::scope::specificity_chain;

/// A read-only source of literal configuration keys.
///
/// Implementations never fail: an unreachable or broken source answers
/// "no value" so that the caller can fall back to the next repository.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Value stored under exactly `key`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Every key/value pair the repository holds.
    async fn export(&self) -> BTreeMap<String, String>;
}

/// Resolve `key` inside a single repository, climbing specificity until a
/// non-empty value is found.
pub async fn get_scoped(repository: &dyn ConfigRepository, key: &str) -> Option<String> {
    for candidate in specificity_chain(key) {
        if let Some(value) = repository.get(&candidate).await.filter(|v| !v.is_empty()) {
            debug!(
                "[{}] resolved '{}' via '{}'",
                repository.name(),
                key,
                candidate
            );
            return Some(value);
        }
    }
    None
}
