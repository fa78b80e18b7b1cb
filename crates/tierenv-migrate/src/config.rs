//! Migration configuration and file selection scope

use std::time::Duration;
use tierenv_core::FileId;

/// Migration coordinator configuration
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Concurrent copy workers per pass
    pub workers: usize,
    /// Bytes copied per backend read/append
    pub chunk_size: usize,
    /// Failed attempts before a file is marked `FailedMigration`
    pub max_retries: u32,
    /// Delay after the first failure; doubles per attempt
    pub base_backoff: Duration,
    /// Upper bound on the retry delay
    pub max_backoff: Duration,
    /// Delete the conventional copy right after commit
    pub delete_source: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            chunk_size: 1024 * 1024, // 1MB
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            delete_source: true,
        }
    }
}

impl MigrationConfig {
    /// Retry delay after `attempts` consecutive failures
    pub fn backoff(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Which files a migration pass may consider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationScope {
    /// Every eligible file
    All,
    /// Files whose identity starts with a prefix
    Prefix(String),
    /// An explicit list of files
    Files(Vec<FileId>),
}

impl MigrationScope {
    /// Returns true if `id` falls inside this scope
    pub fn contains(&self, id: &FileId) -> bool {
        match self {
            MigrationScope::All => true,
            MigrationScope::Prefix(prefix) => id.has_prefix(prefix),
            MigrationScope::Files(ids) => ids.contains(id),
        }
    }
}
