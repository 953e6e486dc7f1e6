use std::collections::{BTreeMap, BTreeSet};

use crate::central::CentralRepository;
use crate::file::FileRepository;
use crate::repository::{ConfigRepository, get_scoped};

/// Layered system configuration.
///
/// Local overrides outrank the central repository. A key is resolved in the
/// override repository first, across its whole specificity chain, before
/// the central repository is consulted at all.
pub struct SystemConfig {
    overrides: Option<FileRepository>,
    central: CentralRepository,
}

impl SystemConfig {
    pub fn new(central: CentralRepository, overrides: Option<FileRepository>) -> Self {
        Self { overrides, central }
    }

    /// Repositories in descending priority
    fn repositories(&self) -> impl Iterator<Item = &dyn ConfigRepository> {
        self.overrides
            .iter()
            .map(|r| r as &dyn ConfigRepository)
            .chain(std::iter::once(&self.central as &dyn ConfigRepository))
    }

    /// Resolve `key` across every repository
    pub async fn get(&self, key: &str) -> Option<String> {
        for repository in self.repositories() {
            if let Some(value) = get_scoped(repository, key).await {
                return Some(value);
            }
        }
        None
    }

    /// Every known key, each resolved through [`SystemConfig::get`] so that
    /// overrides are reflected in the dump.
    pub async fn export(&self) -> BTreeMap<String, String> {
        let mut keys = BTreeSet::new();
        for repository in self.repositories() {
            keys.extend(repository.export().await.into_keys());
        }

        let mut values = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(&key).await {
                values.insert(key, value);
            }
        }
        values
    }

    /// The central repository, for literal writes
    pub fn central(&self) -> &CentralRepository {
        &self.central
    }
}
