//! Storage configuration.

use relmap_core::IsolationLevel;
use serde::Deserialize;

/// Settings for transactions a [`Storage`](crate::Storage) opens itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Isolation level of implicitly opened transactions.
    pub isolation: IsolationLevel,
    /// Commit a still-open owned transaction when the storage is dropped,
    /// instead of rolling it back.
    pub auto_commit: bool,
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }
}
