//! # tierenv Backends
//!
//! File-storage providers that the routing environment dispatches to.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of tierenv.**
//!
//! Users should depend on the main `tierenv` crate instead, which provides
//! the stable public API.
//!
//! ---
//!
//! Two implementations of the [`Backend`] capability interface:
//!
//! - **Conventional**: the ordinary filesystem under a root directory. The only
//!   backend that supports memory-mapping, so write-ahead logs always live here.
//! - **Userspace**: blob-store semantics over a user-space driven block device.
//!   No memory-mapping, no directories, flat names.
//!
//! Backends own raw bytes and nothing else. Placement decisions live in the
//! catalog; moving a file between backends is the migration coordinator's job,
//! never a backend primitive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use memmap2::Mmap;
use std::sync::Arc;
use tierenv_core::{BackendKind, Error, FileStat, OpenMode, Result};

pub mod conventional;
pub mod userspace;

pub use conventional::ConventionalBackend;
pub use userspace::{UserspaceBackend, UserspaceConfig};

/// A capability-bearing file-storage provider.
///
/// Every operation on a name that does not exist (or no longer exists after
/// `delete`) fails with [`Error::NotFound`].
pub trait Backend: Send + Sync {
    /// Which kind of backend this is
    fn kind(&self) -> BackendKind;

    /// Create an empty file. Fails with `AlreadyExists` if the name is taken.
    fn create(&self, name: &str) -> Result<()>;

    /// Check that `name` can be opened in `mode` and return its current size.
    fn open(&self, name: &str, mode: OpenMode) -> Result<FileStat>;

    /// Read up to `len` bytes at `offset`. Short reads happen only at end of file.
    fn read(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Append `data` and return the new file size.
    fn append(&self, name: &str, data: &[u8]) -> Result<u64>;

    /// Make everything appended so far durable.
    fn sync(&self, name: &str) -> Result<()>;

    /// Rename within this backend, replacing `to` if it exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Remove a file.
    fn delete(&self, name: &str) -> Result<()>;

    /// All names starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size of an existing file.
    fn stat(&self, name: &str) -> Result<FileStat>;

    /// Existence check used by the fallback probe.
    fn exists(&self, name: &str) -> Result<bool> {
        match self.stat(name) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Capability query: can files on this backend be memory-mapped?
    fn supports_memory_map(&self) -> bool {
        false
    }

    /// Map a file read-only into memory.
    fn memory_map(&self, name: &str) -> Result<Mmap> {
        Err(Error::Unsupported(format!(
            "{} backend cannot memory-map {}",
            self.kind(),
            name
        )))
    }
}

/// Shared, dynamically dispatched backend handle.
pub type BackendRef = Arc<dyn Backend>;

/// The pair of backends an environment routes between.
#[derive(Clone)]
pub struct BackendSet {
    conventional: BackendRef,
    userspace: BackendRef,
}

impl BackendSet {
    /// Build a set from the two backends
    pub fn new(conventional: BackendRef, userspace: BackendRef) -> Result<Self> {
        if conventional.kind() != BackendKind::Conventional {
            return Err(Error::InvalidOperation(format!(
                "expected a conventional backend, got {}",
                conventional.kind()
            )));
        }
        if userspace.kind() != BackendKind::Userspace {
            return Err(Error::InvalidOperation(format!(
                "expected a userspace backend, got {}",
                userspace.kind()
            )));
        }
        Ok(Self {
            conventional,
            userspace,
        })
    }

    /// Backend for a catalog placement
    pub fn get(&self, kind: BackendKind) -> &BackendRef {
        match kind {
            BackendKind::Conventional => &self.conventional,
            BackendKind::Userspace => &self.userspace,
        }
    }

    /// The conventional backend
    pub fn conventional(&self) -> &BackendRef {
        &self.conventional
    }

    /// The userspace backend
    pub fn userspace(&self) -> &BackendRef {
        &self.userspace
    }
}
