//! Open file handles
//!
//! A handle never caches a backend: every call re-resolves through the
//! environment, so a reader that opened a file before it migrated keeps
//! working after the commit. Append handles mark the file as actively
//! written until dropped, which keeps the migration coordinator away.

use crate::RoutingEnv;
use tierenv_core::{Error, FileId, OpenMode, Result};

/// Handle returned by [`RoutingEnv::open`]
pub struct RoutedFile {
    env: RoutingEnv,
    id: FileId,
    mode: OpenMode,
}

impl RoutedFile {
    pub(crate) fn new(env: RoutingEnv, id: FileId, mode: OpenMode) -> Self {
        Self { env, id, mode }
    }

    /// File identity
    pub fn id(&self) -> &FileId {
        &self.id
    }

    /// Mode the handle was opened in
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Read up to `len` bytes at `offset`
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.env.read(&self.id, offset, len)
    }

    /// Append bytes; fails `Busy` while the file is migrating
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        if self.mode != OpenMode::Append {
            return Err(Error::InvalidOperation(format!(
                "{} was opened read-only",
                self.id
            )));
        }
        self.env.append(&self.id, data)
    }

    /// Make appended bytes durable
    pub fn sync(&self) -> Result<()> {
        self.env.sync(&self.id)
    }

    /// Current size
    pub fn size(&self) -> Result<u64> {
        Ok(self.env.stat(&self.id)?.size)
    }
}

impl Drop for RoutedFile {
    fn drop(&mut self) {
        if self.mode == OpenMode::Append {
            self.env.release_writer(&self.id);
        }
    }
}
