//! # tierenv Routing
//!
//! The engine-facing file environment: every call takes a file identity only,
//! and the catalog decides which backend serves it.
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
//! ## Read resolution
//!
//! ```text
//! catalog hit ──────────────────────────────► recorded backend
//! catalog miss ─► probe conventional ─► probe userspace ─► adopt entry ─► backend
//!                                                      └─► NotFound
//! ```
//!
//! The probe runs once per identity: the adopted entry serves every later call.
//!
//! ## Write exclusion
//!
//! Appends, deletes and renames run under the catalog's per-file lock and fail
//! with `Busy` while the file is `Migrating`. Writers opened in append mode are
//! tracked so the migration coordinator skips files still being written.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tierenv_backend::{BackendRef, BackendSet, Mmap};
use tierenv_catalog::{Catalog, FileGuard};
use tierenv_core::{
    BackendKind, CatalogEntry, Error, FileId, FileStat, OpenMode, PlacementClass, Result,
    WriteActivity,
};
use tracing::{debug, info, warn};

pub mod file;
pub mod policy;

pub use file::RoutedFile;
pub use policy::PlacementPolicy;

struct EnvInner {
    catalog: Arc<Catalog>,
    backends: BackendSet,
    policy: PlacementPolicy,
    /// Open append handles per file
    writers: Mutex<HashMap<FileId, usize>>,
    /// Fallback probes performed (catalog misses)
    probes: AtomicU64,
}

/// Catalog-routed file environment
///
/// Cheap to clone; clones share the catalog, the backends and the writer table.
#[derive(Clone)]
pub struct RoutingEnv {
    inner: Arc<EnvInner>,
}

impl RoutingEnv {
    /// Build an environment over a catalog and a backend pair
    pub fn new(catalog: Arc<Catalog>, backends: BackendSet) -> Self {
        Self::with_policy(catalog, backends, PlacementPolicy::default())
    }

    /// Build an environment with a custom placement policy
    pub fn with_policy(catalog: Arc<Catalog>, backends: BackendSet, policy: PlacementPolicy) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                catalog,
                backends,
                policy,
                writers: Mutex::new(HashMap::new()),
                probes: AtomicU64::new(0),
            }),
        }
    }

    /// The catalog this environment routes through
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    /// The backend pair
    pub fn backends(&self) -> &BackendSet {
        &self.inner.backends
    }

    /// The placement policy
    pub fn policy(&self) -> &PlacementPolicy {
        &self.inner.policy
    }

    /// Number of fallback probes performed so far
    pub fn fallback_probes(&self) -> u64 {
        self.inner.probes.load(Ordering::Relaxed)
    }

    fn backend(&self, kind: BackendKind) -> &BackendRef {
        self.inner.backends.get(kind)
    }

    /// Resolve a file, probing both backends on a catalog miss
    pub fn resolve(&self, id: &FileId) -> Result<CatalogEntry> {
        if let Some(entry) = self.inner.catalog.get(id)? {
            return Ok(entry);
        }
        let guard = self.inner.catalog.lock(id)?;
        self.resolve_locked(&guard)
    }

    /// Resolve under a held lock; adopts whatever the probe finds
    fn resolve_locked(&self, guard: &FileGuard<'_>) -> Result<CatalogEntry> {
        if let Some(entry) = guard.entry()? {
            return Ok(entry);
        }
        let kind = self.probe(guard.id())?;
        guard.adopt(self.inner.policy.classify(guard.id()), kind)
    }

    /// Find the first backend holding data under `id`
    fn probe(&self, id: &FileId) -> Result<BackendKind> {
        self.inner.probes.fetch_add(1, Ordering::Relaxed);
        for kind in self.inner.policy.probe_order() {
            if self.backend(kind).exists(id.as_str())? {
                debug!(%id, %kind, "fallback probe hit");
                return Ok(kind);
            }
        }
        Err(Error::NotFound(id.to_string()))
    }

    /// Create a new file on the conventional backend
    pub fn create(&self, id: &FileId, class: PlacementClass) -> Result<CatalogEntry> {
        let guard = self.inner.catalog.lock(id)?;
        if guard.entry()?.is_some() {
            return Err(Error::AlreadyExists(id.to_string()));
        }
        for kind in [BackendKind::Conventional, BackendKind::Userspace] {
            if self.backend(kind).exists(id.as_str())? {
                return Err(Error::AlreadyExists(format!("{} (data on {})", id, kind)));
            }
        }

        let entry = guard.create(class)?;
        if let Err(e) = self.backend(entry.backend).create(id.as_str()) {
            if let Err(rollback) = guard.remove() {
                warn!(%id, error = %rollback, "failed to roll back catalog entry");
            }
            return Err(e);
        }

        debug!(%id, ?class, backend = %entry.backend, "file created");
        Ok(entry)
    }

    /// Open a file for reading or appending
    pub fn open(&self, id: &FileId, mode: OpenMode) -> Result<RoutedFile> {
        match mode {
            OpenMode::Read => {
                self.stat(id)?;
            }
            OpenMode::Append => {
                let guard = self.inner.catalog.lock(id)?;
                let entry = self.resolve_locked(&guard)?;
                if entry.is_migrating() {
                    return Err(Error::Busy(id.to_string()));
                }
                self.backend(entry.backend).open(id.as_str(), mode)?;
                self.register_writer(id)?;
            }
        }
        Ok(RoutedFile::new(self.clone(), id.clone(), mode))
    }

    /// Read up to `len` bytes at `offset` from whichever backend holds the file
    pub fn read(&self, id: &FileId, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.with_resolved(id, |backend| backend.read(id.as_str(), offset, len))
    }

    /// Size of a file
    pub fn stat(&self, id: &FileId) -> Result<FileStat> {
        self.with_resolved(id, |backend| backend.stat(id.as_str()))
    }

    /// Run a read-side operation, re-resolving once if the recorded backend
    /// lost the file (a commit and source delete landed in between)
    fn with_resolved<T>(&self, id: &FileId, op: impl Fn(&BackendRef) -> Result<T>) -> Result<T> {
        let entry = self.resolve(id)?;
        match op(self.backend(entry.backend)) {
            Err(Error::NotFound(_)) => {
                let again = self.resolve(id)?;
                if again.backend == entry.backend {
                    return Err(Error::NotFound(id.to_string()));
                }
                debug!(%id, from = %entry.backend, to = %again.backend, "re-resolved after move");
                op(self.backend(again.backend))
            }
            other => other,
        }
    }

    /// Append to the recorded backend; fails `Busy` while migrating
    pub fn append(&self, id: &FileId, data: &[u8]) -> Result<u64> {
        let guard = self.inner.catalog.lock(id)?;
        let entry = self.resolve_locked(&guard)?;
        if entry.is_migrating() {
            return Err(Error::Busy(id.to_string()));
        }
        self.backend(entry.backend).append(id.as_str(), data)
    }

    /// Make appended bytes durable
    pub fn sync(&self, id: &FileId) -> Result<()> {
        self.with_resolved(id, |backend| backend.sync(id.as_str()))
    }

    /// Every known identity starting with `prefix`: catalog entries plus
    /// anything either backend holds
    pub fn list(&self, prefix: &str) -> Result<Vec<FileId>> {
        let mut names: BTreeSet<FileId> = self
            .inner
            .catalog
            .entries()?
            .into_iter()
            .map(|e| e.id)
            .filter(|id| id.has_prefix(prefix))
            .collect();
        for kind in [BackendKind::Conventional, BackendKind::Userspace] {
            names.extend(self.backend(kind).list(prefix)?.into_iter().map(FileId::from));
        }
        Ok(names.into_iter().collect())
    }

    /// Delete a file from every backend, then drop its catalog entry
    pub fn delete(&self, id: &FileId) -> Result<()> {
        let guard = self.inner.catalog.lock(id)?;
        let entry = self.resolve_locked(&guard)?;
        if entry.is_migrating() {
            return Err(Error::Busy(id.to_string()));
        }

        match self.backend(entry.backend).delete(id.as_str()) {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.delete_stale(id, entry.backend.other())?;
        guard.remove()?;

        debug!(%id, backend = %entry.backend, "file deleted");
        Ok(())
    }

    /// Rename a file, replacing `to` if it exists
    pub fn rename(&self, from: &FileId, to: &FileId) -> Result<()> {
        let pair = self.inner.catalog.lock_pair(from, to)?;
        let entry = match pair.from_entry()? {
            Some(entry) => entry,
            None => {
                let kind = self.probe(from)?;
                pair.adopt_source(self.inner.policy.classify(from), kind)?
            }
        };
        if entry.is_migrating() {
            return Err(Error::Busy(from.to_string()));
        }
        if pair.to_entry()?.is_some_and(|t| t.is_migrating()) {
            return Err(Error::Busy(to.to_string()));
        }

        let other = entry.backend.other();
        self.delete_stale(to, other)?;
        self.delete_stale(from, other)?;
        self.backend(entry.backend).rename(from.as_str(), to.as_str())?;
        pair.rename()?;

        debug!(%from, %to, backend = %entry.backend, "file renamed");
        Ok(())
    }

    /// Map a file read-only; fails `Unsupported` off the conventional backend
    pub fn memory_map(&self, id: &FileId) -> Result<Mmap> {
        let entry = self.resolve(id)?;
        let backend = self.backend(entry.backend);
        if !backend.supports_memory_map() {
            return Err(Error::Unsupported(format!(
                "{} lives on the {} backend, which cannot memory-map",
                id, entry.backend
            )));
        }
        backend.memory_map(id.as_str())
    }

    /// Remove a non-authoritative copy if one exists
    fn delete_stale(&self, id: &FileId, kind: BackendKind) -> Result<()> {
        match self.backend(kind).delete(id.as_str()) {
            Ok(()) => {
                info!(%id, backend = %kind, "removed stale copy");
                Ok(())
            }
            Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn register_writer(&self, id: &FileId) -> Result<()> {
        let mut writers = self.inner.writers.lock().map_err(|_| Error::LockPoisoned)?;
        *writers.entry(id.clone()).or_insert(0) += 1;
        Ok(())
    }

    pub(crate) fn release_writer(&self, id: &FileId) {
        let mut writers = match self.inner.writers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(count) = writers.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                writers.remove(id);
            }
        }
    }
}

impl WriteActivity for RoutingEnv {
    fn is_being_written(&self, id: &FileId) -> bool {
        self.inner
            .writers
            .lock()
            .map(|writers| writers.contains_key(id))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};
    use tierenv_backend::{Backend, ConventionalBackend, UserspaceBackend, UserspaceConfig};
    use tierenv_core::MigrationState;

    struct Fixture {
        _dir: TempDir,
        env: RoutingEnv,
        conventional: ConventionalBackend,
        userspace: UserspaceBackend,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path().join("catalog")).unwrap());
        let conventional = ConventionalBackend::open(dir.path().join("files")).unwrap();
        let userspace = UserspaceBackend::new(UserspaceConfig::default());
        let backends = BackendSet::new(
            Arc::new(conventional.clone()),
            Arc::new(userspace.clone()),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            env: RoutingEnv::new(catalog, backends),
            conventional,
            userspace,
        }
    }

    #[test]
    fn test_create_append_read() {
        let f = fixture();
        let id = FileId::new("sst-001");

        let entry = f.env.create(&id, PlacementClass::Data).unwrap();
        assert_eq!(entry.backend, BackendKind::Conventional);
        f.env.append(&id, b"hello ").unwrap();
        assert_eq!(f.env.append(&id, b"world").unwrap(), 11);
        f.env.sync(&id).unwrap();

        assert_eq!(f.env.read(&id, 0, 11).unwrap(), b"hello world");
        assert_eq!(f.env.stat(&id).unwrap().size, 11);
        assert!(f.conventional.exists("sst-001").unwrap());
    }

    #[test]
    fn test_create_rejects_existing_data() {
        let f = fixture();
        f.userspace.create("sst-009").unwrap();

        assert!(matches!(
            f.env.create(&FileId::new("sst-009"), PlacementClass::Data),
            Err(Error::AlreadyExists(_))
        ));
        assert!(f.env.catalog().get(&FileId::new("sst-009")).unwrap().is_none());
    }

    #[test]
    fn test_fallback_probe_adopts_once() {
        let f = fixture();
        f.conventional.create("sst-007").unwrap();
        f.conventional.append("sst-007", b"orphan").unwrap();
        let id = FileId::new("sst-007");

        assert_eq!(f.env.read(&id, 0, 6).unwrap(), b"orphan");
        assert_eq!(f.env.fallback_probes(), 1);
        let entry = f.env.catalog().resolve(&id).unwrap();
        assert_eq!(entry.class, PlacementClass::Data);
        assert_eq!(entry.state, MigrationState::Resident);

        f.env.read(&id, 0, 6).unwrap();
        assert_eq!(f.env.fallback_probes(), 1);
    }

    #[test]
    fn test_fallback_probe_finds_userspace() {
        let f = fixture();
        f.userspace.create("sst-008").unwrap();
        f.userspace.append("sst-008", b"moved").unwrap();
        let id = FileId::new("sst-008");

        assert_eq!(f.env.stat(&id).unwrap().size, 5);
        let entry = f.env.catalog().resolve(&id).unwrap();
        assert_eq!(entry.backend, BackendKind::Userspace);
        assert_eq!(entry.state, MigrationState::Migrated);
    }

    #[test]
    fn test_missing_everywhere() {
        let f = fixture();
        assert!(matches!(
            f.env.read(&FileId::new("nope"), 0, 1),
            Err(Error::NotFound(_))
        ));
        assert!(f.env.catalog().is_empty());
    }

    #[test]
    fn test_append_busy_while_migrating() {
        let f = fixture();
        let id = FileId::new("sst-001");
        f.env.create(&id, PlacementClass::Data).unwrap();
        f.env.append(&id, b"abc").unwrap();

        let token = f.env.catalog().begin_migration(&id).unwrap();
        assert!(matches!(f.env.append(&id, b"x"), Err(Error::Busy(_))));
        assert!(matches!(f.env.delete(&id), Err(Error::Busy(_))));
        assert!(matches!(
            f.env.open(&id, OpenMode::Append),
            Err(Error::Busy(_))
        ));
        // Reads keep working from the source.
        assert_eq!(f.env.read(&id, 0, 3).unwrap(), b"abc");

        f.env.catalog().abort_migration(&id, token).unwrap();
        f.env.append(&id, b"d").unwrap();
    }

    #[test]
    fn test_memory_map_capability() {
        let f = fixture();
        let wal = FileId::new("wal-01");
        f.env.create(&wal, PlacementClass::Wal).unwrap();
        f.env.append(&wal, b"log").unwrap();
        f.env.sync(&wal).unwrap();
        assert_eq!(&f.env.memory_map(&wal).unwrap()[..], b"log");

        f.userspace.create("sst-002").unwrap();
        f.userspace.append("sst-002", b"data").unwrap();
        assert!(matches!(
            f.env.memory_map(&FileId::new("sst-002")),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_delete_removes_stale_copy() {
        let f = fixture();
        let id = FileId::new("sst-001");
        f.env.create(&id, PlacementClass::Data).unwrap();
        f.userspace.create("sst-001").unwrap();

        f.env.delete(&id).unwrap();
        assert!(!f.conventional.exists("sst-001").unwrap());
        assert!(!f.userspace.exists("sst-001").unwrap());
        assert!(f.env.catalog().get(&id).unwrap().is_none());
        assert!(matches!(f.env.delete(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rename_replaces_target() {
        let f = fixture();
        let tmp = FileId::new("CURRENT.tmp");
        let current = FileId::new("CURRENT");
        f.env.create(&current, PlacementClass::Other).unwrap();
        f.env.append(&current, b"MANIFEST-1").unwrap();
        f.env.create(&tmp, PlacementClass::Other).unwrap();
        f.env.append(&tmp, b"MANIFEST-2").unwrap();

        f.env.rename(&tmp, &current).unwrap();
        assert_eq!(f.env.read(&current, 0, 10).unwrap(), b"MANIFEST-2");
        assert!(f.env.catalog().get(&tmp).unwrap().is_none());
        assert!(!f.conventional.exists("CURRENT.tmp").unwrap());
    }

    #[test]
    fn test_list_unions_sources() {
        let f = fixture();
        f.env.create(&FileId::new("sst-001"), PlacementClass::Data).unwrap();
        f.userspace.create("sst-002").unwrap();
        f.conventional.create("wal-01").unwrap();

        let all = f.env.list("").unwrap();
        assert_eq!(
            all,
            vec![
                FileId::new("sst-001"),
                FileId::new("sst-002"),
                FileId::new("wal-01")
            ]
        );
        assert_eq!(f.env.list("sst").unwrap().len(), 2);
    }

    #[test]
    fn test_append_handles_track_writers() {
        let f = fixture();
        let id = FileId::new("sst-001");
        f.env.create(&id, PlacementClass::Data).unwrap();

        let writer = f.env.open(&id, OpenMode::Append).unwrap();
        let second = f.env.open(&id, OpenMode::Append).unwrap();
        writer.append(b"abc").unwrap();
        assert!(f.env.is_being_written(&id));

        drop(writer);
        assert!(f.env.is_being_written(&id));
        drop(second);
        assert!(!f.env.is_being_written(&id));

        let reader = f.env.open(&id, OpenMode::Read).unwrap();
        assert!(!f.env.is_being_written(&id));
        assert!(matches!(
            reader.append(b"x"),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(reader.size().unwrap(), 3);
    }
}
