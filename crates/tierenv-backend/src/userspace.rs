//! Userspace backend - blob store over a user-space driven block device
//!
//! The real device driver is an external collaborator; this backend keeps the
//! blob namespace in process memory and models the one device property the
//! rest of the system cares about: appended bytes are only durable once
//! `sync` has covered them. Clones share the same device, so a clone handed
//! to a "restarted" environment sees exactly what the device retained.

use crate::Backend;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tierenv_core::{BackendKind, Error, FileStat, OpenMode, Result};
use tracing::{debug, warn};

/// Userspace device configuration
#[derive(Debug, Clone)]
pub struct UserspaceConfig {
    /// Name of the blob filesystem on the device
    pub fs_name: String,
    /// Name of the block device the filesystem is mounted on
    pub bdev_name: String,
    /// Optional capacity limit in bytes
    pub capacity_bytes: Option<u64>,
}

impl Default for UserspaceConfig {
    fn default() -> Self {
        Self {
            fs_name: "blobfs".to_string(),
            bdev_name: "Nvme0n1".to_string(),
            capacity_bytes: None,
        }
    }
}

#[derive(Debug, Default)]
struct Blob {
    data: Vec<u8>,
    synced_len: usize,
}

#[derive(Debug, Default)]
struct Device {
    blobs: HashMap<String, Blob>,
    used_bytes: u64,
}

fn lock_err() -> Error {
    Error::LockPoisoned
}

/// In-process model of the userspace blob store
#[derive(Debug, Clone)]
pub struct UserspaceBackend {
    config: Arc<UserspaceConfig>,
    device: Arc<RwLock<Device>>,
}

impl UserspaceBackend {
    /// Attach to a fresh, empty device
    pub fn new(config: UserspaceConfig) -> Self {
        debug!(
            fs = %config.fs_name,
            bdev = %config.bdev_name,
            "attached userspace blob store"
        );
        Self {
            config: Arc::new(config),
            device: Arc::new(RwLock::new(Device::default())),
        }
    }

    /// Device configuration
    pub fn config(&self) -> &UserspaceConfig {
        &self.config
    }

    /// Total bytes currently stored
    pub fn used_bytes(&self) -> Result<u64> {
        Ok(self.device.read().map_err(|_| lock_err())?.used_bytes)
    }

    /// Drop every byte not yet covered by a `sync`, as a power loss would.
    ///
    /// Returns the number of bytes discarded.
    pub fn discard_unsynced(&self) -> Result<u64> {
        let mut device = self.device.write().map_err(|_| lock_err())?;
        let mut discarded = 0u64;
        for blob in device.blobs.values_mut() {
            let lost = blob.data.len() - blob.synced_len;
            blob.data.truncate(blob.synced_len);
            discarded += lost as u64;
        }
        device.used_bytes -= discarded;
        if discarded > 0 {
            warn!(
                bdev = %self.config.bdev_name,
                discarded,
                "discarded unsynced userspace bytes"
            );
        }
        Ok(discarded)
    }
}

impl Backend for UserspaceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Userspace
    }

    fn create(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidOperation("empty blob name".to_string()));
        }
        let mut device = self.device.write().map_err(|_| lock_err())?;
        if device.blobs.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        device.blobs.insert(name.to_string(), Blob::default());
        debug!(name, "created userspace blob");
        Ok(())
    }

    fn open(&self, name: &str, _mode: OpenMode) -> Result<FileStat> {
        self.stat(name)
    }

    fn read(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let device = self.device.read().map_err(|_| lock_err())?;
        let blob = device
            .blobs
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let start = (offset as usize).min(blob.data.len());
        let end = start.saturating_add(len).min(blob.data.len());
        Ok(blob.data[start..end].to_vec())
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<u64> {
        let mut device = self.device.write().map_err(|_| lock_err())?;
        if !device.blobs.contains_key(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        if let Some(capacity) = self.config.capacity_bytes {
            if device.used_bytes + data.len() as u64 > capacity {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!(
                        "userspace device {} full: {} of {} bytes used",
                        self.config.bdev_name, device.used_bytes, capacity
                    ),
                )));
            }
        }
        device.used_bytes += data.len() as u64;
        let blob = device
            .blobs
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        blob.data.extend_from_slice(data);
        Ok(blob.data.len() as u64)
    }

    fn sync(&self, name: &str) -> Result<()> {
        let mut device = self.device.write().map_err(|_| lock_err())?;
        let blob = device
            .blobs
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        blob.synced_len = blob.data.len();
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut device = self.device.write().map_err(|_| lock_err())?;
        let blob = device
            .blobs
            .remove(from)
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        if let Some(replaced) = device.blobs.insert(to.to_string(), blob) {
            device.used_bytes -= replaced.data.len() as u64;
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut device = self.device.write().map_err(|_| lock_err())?;
        let blob = device
            .blobs
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        device.used_bytes -= blob.data.len() as u64;
        debug!(name, "deleted userspace blob");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let device = self.device.read().map_err(|_| lock_err())?;
        let mut names: Vec<String> = device
            .blobs
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn stat(&self, name: &str) -> Result<FileStat> {
        let device = self.device.read().map_err(|_| lock_err())?;
        device
            .blobs
            .get(name)
            .map(|b| FileStat {
                size: b.data.len() as u64,
            })
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}
