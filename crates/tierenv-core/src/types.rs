//! Data model shared by the backends, the catalog and the routing layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable logical name of a file as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    /// Create a file identity from a path-like name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as passed to backends
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name starts with `prefix`
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FileId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Category fixed at creation time; decides migration and mmap eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlacementClass {
    /// Write-ahead log: pinned to the conventional backend
    Wal,
    /// Table data: eligible for migration
    Data,
    /// Everything else (manifests, options, lock files)
    Other,
}

impl PlacementClass {
    /// Only data files are ever moved to the userspace backend
    pub fn is_migratable(self) -> bool {
        matches!(self, PlacementClass::Data)
    }
}

/// Which backend holds the authoritative copy of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Ordinary filesystem
    Conventional,
    /// Blob store over a user-space driven block device
    Userspace,
}

impl BackendKind {
    /// The backend a fallback probe tries after this one
    pub fn other(self) -> Self {
        match self {
            BackendKind::Conventional => BackendKind::Userspace,
            BackendKind::Userspace => BackendKind::Conventional,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Conventional => f.write_str("conventional"),
            BackendKind::Userspace => f.write_str("userspace"),
        }
    }
}

/// Migration progress of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    /// Lives on the backend it was born on
    Resident,
    /// A copy to the userspace backend is in flight
    Migrating,
    /// Authoritative copy is on the userspace backend
    Migrated,
    /// Gave up after the retry ceiling; still readable from its original backend
    FailedMigration,
}

/// Catalog record for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Logical identity
    pub id: FileId,
    /// Immutable placement class
    pub class: PlacementClass,
    /// Backend holding the authoritative copy
    pub backend: BackendKind,
    /// Migration state
    pub state: MigrationState,
    /// Fencing token of the in-flight migration (set only while `Migrating`)
    pub token: Option<u64>,
}

impl CatalogEntry {
    /// A freshly created file: always born resident on the conventional backend
    pub fn resident(id: FileId, class: PlacementClass) -> Self {
        Self {
            id,
            class,
            backend: BackendKind::Conventional,
            state: MigrationState::Resident,
            token: None,
        }
    }

    /// Returns true while a migration holds the file
    pub fn is_migrating(&self) -> bool {
        self.state == MigrationState::Migrating
    }
}

/// Result of a `stat` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes
    pub size: u64,
}

/// How a file is opened through the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Random-access reads
    Read,
    /// Appends (the file counts as actively written while open)
    Append,
}

/// Engine-side hint: is this file still being appended to?
///
/// The migration coordinator never begins migrating a file for which this
/// returns true.
pub trait WriteActivity: Send + Sync {
    /// Returns true if some writer currently holds the file open for append
    fn is_being_written(&self, id: &FileId) -> bool;
}

/// A `WriteActivity` that never reports activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWriteActivity;

impl WriteActivity for NoWriteActivity {
    fn is_being_written(&self, _id: &FileId) -> bool {
        false
    }
}
