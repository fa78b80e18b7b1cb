//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tierenv::{
    Backend, BackendKind, BackendSet, ConventionalBackend, EnvConfig, Environment, FileId,
    FileStat, Mmap, MigrationConfig, OpenMode, Result, UserspaceBackend, UserspaceConfig,
};

/// Migration settings that retry immediately
pub fn fast_retry_config(data_dir: &Path) -> EnvConfig {
    EnvConfig::new(data_dir).with_migration(MigrationConfig {
        chunk_size: 1024,
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..Default::default()
    })
}

/// Open an environment over a shared userspace device
pub fn open_env(data_dir: &Path, userspace: &UserspaceBackend) -> Environment {
    Environment::open(fast_retry_config(data_dir), userspace.clone()).unwrap()
}

/// A fresh userspace device
pub fn device() -> UserspaceBackend {
    UserspaceBackend::new(UserspaceConfig::default())
}

/// Deterministic test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Userspace backend that flips a bit in every append while armed
pub struct CorruptingBackend {
    inner: UserspaceBackend,
    armed: AtomicBool,
}

impl CorruptingBackend {
    pub fn new(inner: UserspaceBackend) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl Backend for CorruptingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Userspace
    }

    fn create(&self, name: &str) -> Result<()> {
        self.inner.create(name)
    }

    fn open(&self, name: &str, mode: OpenMode) -> Result<FileStat> {
        self.inner.open(name, mode)
    }

    fn read(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.inner.read(name, offset, len)
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<u64> {
        if self.armed.load(Ordering::SeqCst) && !data.is_empty() {
            let mut flipped = data.to_vec();
            flipped[0] ^= 0x01;
            return self.inner.append(name, &flipped);
        }
        self.inner.append(name, data)
    }

    fn sync(&self, name: &str) -> Result<()> {
        self.inner.sync(name)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn stat(&self, name: &str) -> Result<FileStat> {
        self.inner.stat(name)
    }
}

/// Conventional backend that counts existence checks
pub struct CountingBackend {
    inner: ConventionalBackend,
    stats: AtomicU64,
}

impl CountingBackend {
    pub fn new(inner: ConventionalBackend) -> Self {
        Self {
            inner,
            stats: AtomicU64::new(0),
        }
    }

    pub fn stat_calls(&self) -> u64 {
        self.stats.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Conventional
    }

    fn create(&self, name: &str) -> Result<()> {
        self.inner.create(name)
    }

    fn open(&self, name: &str, mode: OpenMode) -> Result<FileStat> {
        self.inner.open(name, mode)
    }

    fn read(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.inner.read(name, offset, len)
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<u64> {
        self.inner.append(name, data)
    }

    fn sync(&self, name: &str) -> Result<()> {
        self.inner.sync(name)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn stat(&self, name: &str) -> Result<FileStat> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        self.inner.stat(name)
    }

    fn supports_memory_map(&self) -> bool {
        self.inner.supports_memory_map()
    }

    fn memory_map(&self, name: &str) -> Result<Mmap> {
        self.inner.memory_map(name)
    }
}

/// Open an environment over arbitrary backends
pub fn open_with(data_dir: &Path, conventional: Arc<dyn Backend>, userspace: Arc<dyn Backend>) -> Environment {
    let backends = BackendSet::new(conventional, userspace).unwrap();
    Environment::open_with_backends(fast_retry_config(data_dir), backends).unwrap()
}

/// Create a file and fill it
pub fn write_file(env: &Environment, name: &str, class: tierenv::PlacementClass, data: &[u8]) -> FileId {
    let id = FileId::new(name);
    env.create(&id, class).unwrap();
    env.append(&id, data).unwrap();
    env.sync(&id).unwrap();
    id
}
