//! One in-flight copy from the conventional to the userspace backend
//!
//! A job lives only in a worker's memory. The durable side of an in-flight
//! migration is the catalog's `Migrating` marker plus its fencing token.

use crc32fast::Hasher;
use tierenv_backend::{Backend, BackendRef};
use tierenv_core::{Error, FileId, Result};
use tracing::debug;

/// Copy progress for a single file
pub struct MigrationJob {
    id: FileId,
    token: u64,
    bytes_copied: u64,
    hasher: Hasher,
}

impl MigrationJob {
    /// Start a job for a file whose migration began with `token`
    pub fn new(id: FileId, token: u64) -> Self {
        Self {
            id,
            token,
            bytes_copied: 0,
            hasher: Hasher::new(),
        }
    }

    /// File being migrated
    pub fn id(&self) -> &FileId {
        &self.id
    }

    /// Fencing token of this migration
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Bytes copied so far
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }

    /// Checksum of everything copied so far
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Copy the whole source file to a fresh destination file, then sync it
    pub fn copy(&mut self, src: &BackendRef, dst: &BackendRef, chunk_size: usize) -> Result<()> {
        let name = self.id.as_str();
        match dst.delete(name) {
            Ok(()) => debug!(id = %self.id, "removed leftover destination copy"),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        dst.create(name)?;

        loop {
            let chunk = src.read(name, self.bytes_copied, chunk_size.max(1))?;
            if chunk.is_empty() {
                break;
            }
            dst.append(name, &chunk)?;
            self.hasher.update(&chunk);
            self.bytes_copied += chunk.len() as u64;
        }

        dst.sync(name)
    }

    /// Re-read the destination in full and check it against the running
    /// checksum and length
    pub fn verify(&self, dst: &BackendRef, chunk_size: usize) -> Result<()> {
        let expected = self.checksum();
        let (actual, size) = checksum_of(dst.as_ref(), self.id.as_str(), chunk_size)?;

        if actual != expected || size != self.bytes_copied {
            return Err(Error::IntegrityFailure {
                id: self.id.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// crc32 and length of a whole file, read in chunks
pub fn checksum_of(backend: &dyn Backend, name: &str, chunk_size: usize) -> Result<(u32, u64)> {
    let mut hasher = Hasher::new();
    let mut offset = 0u64;
    loop {
        let chunk = backend.read(name, offset, chunk_size.max(1))?;
        if chunk.is_empty() {
            break;
        }
        hasher.update(&chunk);
        offset += chunk.len() as u64;
    }
    Ok((hasher.finalize(), offset))
}
