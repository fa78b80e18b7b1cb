//! # tierenv Catalog
//!
//! Durable mapping from file identity to backend placement and migration state.
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
//! The catalog is loaded into memory at open and kept durable with two files
//! in its directory:
//!
//! - **CATALOG**: a checkpoint of the complete state, replaced atomically
//! - **CATALOG.log**: framed transition records appended since that checkpoint
//!
//! Every mutating transition appends (and by default fsyncs) one record
//! *before* the new state becomes visible in memory, so other callers never
//! observe a transition a crash could take back. Open replays the log over the
//! checkpoint, stopping at the first torn record, then folds everything into
//! a fresh checkpoint.
//!
//! ## Architecture
//!
//! ```text
//! transition ─► per-file lock ─► validate ─► append record ─► publish ─► maybe checkpoint
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tierenv_core::format_version::{catalog_log_version, magic, CATALOG_LOG_FORMAT_VERSION};
use tierenv_core::{
    BackendKind, CatalogEntry, Error, FileId, MigrationState, PlacementClass, Result,
};
use tracing::{debug, info, warn};

pub mod checkpoint;
mod lock;
pub mod record;

pub use checkpoint::CheckpointImage;
pub use record::CatalogRecord;

use lock::LockTable;

/// Checkpoint file name
const CHECKPOINT_FILE: &str = "CATALOG";
/// Record log file name
const LOG_FILE: &str = "CATALOG.log";
/// Log header: [magic u32 LE][version u16 LE][reserved u16]
const LOG_HEADER_LEN: u64 = 8;

/// Durability of individual log appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync every record before acknowledging the transition
    Sync,
    /// No fsync (tests only, unsafe for power loss)
    None,
}

/// Catalog configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Number of logged transitions between checkpoints
    pub checkpoint_threshold: usize,
    /// Sync mode for the record log
    pub sync_mode: SyncMode,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            checkpoint_threshold: 64,
            sync_mode: SyncMode::Sync,
        }
    }
}

/// Open record log plus bookkeeping
struct CatalogLog {
    file: File,
    len: u64,
    records: usize,
}

impl CatalogLog {
    fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut header = Vec::with_capacity(LOG_HEADER_LEN as usize);
        header.extend_from_slice(&magic::CATALOG_LOG.to_le_bytes());
        header.extend_from_slice(&CATALOG_LOG_FORMAT_VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            file,
            len: LOG_HEADER_LEN,
            records: 0,
        })
    }

    fn append(&mut self, record: &CatalogRecord, sync_mode: SyncMode) -> Result<()> {
        let frame = record.encode()?;
        let written = self
            .file
            .write_all(&frame)
            .and_then(|_| match sync_mode {
                SyncMode::Sync => self.file.sync_data(),
                SyncMode::None => Ok(()),
            });

        if let Err(e) = written {
            // Cut off a partial frame so later records stay replayable.
            let _ = self.file.set_len(self.len);
            return Err(Error::Io(e));
        }

        self.len += frame.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Drop every record, keeping the header
    fn reset(&mut self) -> Result<()> {
        self.file.set_len(LOG_HEADER_LEN)?;
        self.file.sync_all()?;
        self.len = LOG_HEADER_LEN;
        self.records = 0;
        Ok(())
    }
}

/// Read every intact record from a log file
fn read_log(path: &Path) -> Result<Vec<CatalogRecord>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    if contents.len() < LOG_HEADER_LEN as usize {
        warn!(?path, len = contents.len(), "catalog log header torn, ignoring log");
        return Ok(Vec::new());
    }

    let log_magic = u32::from_le_bytes([contents[0], contents[1], contents[2], contents[3]]);
    let version = u16::from_le_bytes([contents[4], contents[5]]);
    if log_magic != magic::CATALOG_LOG {
        return Err(Error::Corruption(format!(
            "bad catalog log magic {:08x}",
            log_magic
        )));
    }
    if !catalog_log_version().can_read(version) {
        return Err(Error::Corruption(format!(
            "unsupported catalog log version {}",
            version
        )));
    }

    let mut records = Vec::new();
    let mut offset = LOG_HEADER_LEN as usize;
    while offset < contents.len() {
        match CatalogRecord::decode(&contents[offset..]) {
            Ok((record, size)) => {
                records.push(record);
                offset += size;
            }
            Err(e) => {
                warn!(
                    offset,
                    dropped = contents.len() - offset,
                    error = %e,
                    "catalog log tail is torn, dropping it"
                );
                break;
            }
        }
    }

    Ok(records)
}

/// Apply a record to an in-memory map
fn apply(entries: &mut HashMap<FileId, CatalogEntry>, record: &CatalogRecord) {
    match record {
        CatalogRecord::Put { entry } => {
            entries.insert(entry.id.clone(), entry.clone());
        }
        CatalogRecord::Remove { id } => {
            entries.remove(id);
        }
        CatalogRecord::Rename { from, entry } => {
            entries.remove(from);
            entries.insert(entry.id.clone(), entry.clone());
        }
    }
}

/// The durable placement catalog
pub struct Catalog {
    /// Catalog directory
    dir: PathBuf,
    /// Configuration
    config: CatalogConfig,
    /// Published (durable) state
    entries: RwLock<HashMap<FileId, CatalogEntry>>,
    /// Record log; also serializes publication against checkpoints
    log: Mutex<CatalogLog>,
    /// Next fencing token
    next_token: AtomicU64,
    /// Per-file transition locks
    locks: LockTable,
}

impl Catalog {
    /// Open or create a catalog in the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, CatalogConfig::default())
    }

    /// Open or create a catalog with custom configuration
    pub fn open_with_config(dir: impl AsRef<Path>, config: CatalogConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let image = checkpoint::load(&dir.join(CHECKPOINT_FILE))?;
        let mut next_token = image.next_token;
        let mut entries: HashMap<FileId, CatalogEntry> = image
            .entries
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let records = read_log(&dir.join(LOG_FILE))?;
        let replayed = records.len();
        for record in &records {
            if let Some(token) = record.token() {
                next_token = next_token.max(token + 1);
            }
            apply(&mut entries, record);
        }

        let log = CatalogLog::create(&dir.join(LOG_FILE).with_extension("log.new"))?;
        let catalog = Self {
            dir,
            config,
            entries: RwLock::new(entries),
            log: Mutex::new(log),
            next_token: AtomicU64::new(next_token),
            locks: LockTable::default(),
        };

        // Fold the replayed log into a fresh checkpoint, then swap the new
        // empty log into place.
        {
            let log = catalog.log.lock().map_err(|_| Error::LockPoisoned)?;
            catalog.write_checkpoint()?;
            fs::rename(
                catalog.dir.join(LOG_FILE).with_extension("log.new"),
                catalog.dir.join(LOG_FILE),
            )?;
            checkpoint::sync_dir(&catalog.dir)?;
            debug_assert_eq!(log.records, 0);
        }

        info!(
            dir = ?catalog.dir,
            entries = catalog.len(),
            replayed,
            "catalog opened"
        );

        Ok(catalog)
    }

    /// Catalog directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up an entry
    pub fn resolve(&self, id: &FileId) -> Result<CatalogEntry> {
        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Look up an entry without failing on a miss
    pub fn get(&self, id: &FileId) -> Result<Option<CatalogEntry>> {
        let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
        Ok(entries.get(id).cloned())
    }

    /// Snapshot of every entry, sorted by identity
    pub fn entries(&self) -> Result<Vec<CatalogEntry>> {
        let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
        let mut all: Vec<CatalogEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if the catalog holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock a single file for a compound operation
    pub fn lock(&self, id: &FileId) -> Result<FileGuard<'_>> {
        self.locks.acquire(&[id])?;
        Ok(FileGuard {
            catalog: self,
            id: id.clone(),
        })
    }

    /// Lock a single file only if nobody else holds it
    pub fn try_lock(&self, id: &FileId) -> Result<Option<FileGuard<'_>>> {
        if self.locks.try_acquire(&[id])? {
            Ok(Some(FileGuard {
                catalog: self,
                id: id.clone(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Lock two files at once (rename)
    pub fn lock_pair(&self, from: &FileId, to: &FileId) -> Result<PairGuard<'_>> {
        if from == to {
            return Err(Error::InvalidOperation(format!(
                "cannot lock {} against itself",
                from
            )));
        }
        self.locks.acquire(&[from, to])?;
        Ok(PairGuard {
            catalog: self,
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Create an entry for a new file
    pub fn create(&self, id: &FileId, class: PlacementClass) -> Result<CatalogEntry> {
        self.lock(id)?.create(class)
    }

    /// Record a file discovered on a backend
    pub fn adopt(
        &self,
        id: &FileId,
        class: PlacementClass,
        backend: BackendKind,
    ) -> Result<CatalogEntry> {
        self.lock(id)?.adopt(class, backend)
    }

    /// Start a migration and return its fencing token
    pub fn begin_migration(&self, id: &FileId) -> Result<u64> {
        self.lock(id)?.begin_migration()
    }

    /// Finish a migration: the userspace copy becomes authoritative
    pub fn commit_migration(&self, id: &FileId, token: u64) -> Result<CatalogEntry> {
        self.lock(id)?.commit_migration(token)
    }

    /// Roll a migration back to `Resident`
    pub fn abort_migration(&self, id: &FileId, token: u64) -> Result<CatalogEntry> {
        self.lock(id)?.abort_migration(token)
    }

    /// Give up on a migration after the retry ceiling
    pub fn fail_migration(&self, id: &FileId, token: u64) -> Result<CatalogEntry> {
        self.lock(id)?.fail_migration(token)
    }

    /// Make a failed file eligible again
    pub fn reset_failed(&self, id: &FileId) -> Result<CatalogEntry> {
        self.lock(id)?.reset_failed()
    }

    /// Remove an entry
    pub fn remove(&self, id: &FileId) -> Result<CatalogEntry> {
        self.lock(id)?.remove()
    }

    /// Re-key an entry
    pub fn rename(&self, from: &FileId, to: &FileId) -> Result<CatalogEntry> {
        self.lock_pair(from, to)?.rename()
    }

    /// Force a checkpoint now
    pub fn checkpoint(&self) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::LockPoisoned)?;
        self.write_checkpoint()?;
        log.reset()
    }

    /// Adoption body; caller holds the lock on `id`
    fn adopt_locked(
        &self,
        id: &FileId,
        class: PlacementClass,
        backend: BackendKind,
    ) -> Result<CatalogEntry> {
        if let Some(existing) = self.get(id)? {
            return Ok(existing);
        }

        let class = if class == PlacementClass::Wal && backend == BackendKind::Userspace {
            warn!(id = %id, "WAL-named file found on userspace backend, adopting as Other");
            PlacementClass::Other
        } else {
            class
        };
        let state = match backend {
            BackendKind::Conventional => MigrationState::Resident,
            BackendKind::Userspace => MigrationState::Migrated,
        };
        let entry = CatalogEntry {
            id: id.clone(),
            class,
            backend,
            state,
            token: None,
        };
        self.commit(CatalogRecord::Put {
            entry: entry.clone(),
        })?;
        info!(id = %id, %backend, "adopted file found by fallback probe");
        Ok(entry)
    }

    /// Make `record` durable, then publish it
    fn commit(&self, record: CatalogRecord) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::LockPoisoned)?;
        log.append(&record, self.config.sync_mode)?;

        {
            let mut entries = self.entries.write().map_err(|_| Error::LockPoisoned)?;
            apply(&mut entries, &record);
        }

        if log.records >= self.config.checkpoint_threshold {
            // The transition is already durable in the log; a failed
            // checkpoint only leaves the log longer.
            match self.write_checkpoint().and_then(|_| log.reset()) {
                Ok(()) => debug!("catalog checkpointed"),
                Err(e) => warn!(error = %e, "catalog checkpoint failed"),
            }
        }

        Ok(())
    }

    /// Write the published state as a checkpoint; caller holds the log lock
    fn write_checkpoint(&self) -> Result<()> {
        let image = {
            let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
            let mut list: Vec<CatalogEntry> = entries.values().cloned().collect();
            list.sort_by(|a, b| a.id.cmp(&b.id));
            CheckpointImage {
                next_token: self.next_token.load(Ordering::SeqCst),
                entries: list,
                ..Default::default()
            }
        };
        checkpoint::store(&self.dir.join(CHECKPOINT_FILE), &image)
    }
}

/// Exclusive hold on one file's catalog entry
///
/// Every transition goes through a guard; the public `Catalog` methods are
/// shorthands that take and drop one.
pub struct FileGuard<'a> {
    catalog: &'a Catalog,
    id: FileId,
}

impl FileGuard<'_> {
    /// The locked identity
    pub fn id(&self) -> &FileId {
        &self.id
    }

    /// Current entry, if any
    pub fn entry(&self) -> Result<Option<CatalogEntry>> {
        self.catalog.get(&self.id)
    }

    /// Current entry or `NotFound`
    pub fn resolve(&self) -> Result<CatalogEntry> {
        self.catalog.resolve(&self.id)
    }

    /// Create an entry: born resident on the conventional backend
    pub fn create(&self, class: PlacementClass) -> Result<CatalogEntry> {
        if self.entry()?.is_some() {
            return Err(Error::AlreadyExists(self.id.to_string()));
        }
        let entry = CatalogEntry::resident(self.id.clone(), class);
        self.catalog.commit(CatalogRecord::Put {
            entry: entry.clone(),
        })?;
        debug!(id = %self.id, ?class, "catalog entry created");
        Ok(entry)
    }

    /// Record a file found by a fallback probe; keeps an existing entry
    pub fn adopt(&self, class: PlacementClass, backend: BackendKind) -> Result<CatalogEntry> {
        self.catalog.adopt_locked(&self.id, class, backend)
    }

    /// Resident ⇒ Migrating; returns a fresh fencing token
    pub fn begin_migration(&self) -> Result<u64> {
        let entry = self.resolve()?;
        if entry.class == PlacementClass::Wal {
            return Err(Error::InvalidClass(format!(
                "{} is a WAL file and never migrates",
                self.id
            )));
        }
        if !entry.class.is_migratable() {
            return Err(Error::InvalidClass(format!(
                "{} has class {:?}; only data files migrate",
                self.id, entry.class
            )));
        }
        if entry.state != MigrationState::Resident || entry.backend != BackendKind::Conventional
        {
            return Err(Error::Conflict(format!(
                "{} is {:?} on {}",
                self.id, entry.state, entry.backend
            )));
        }

        let token = self.catalog.next_token.fetch_add(1, Ordering::SeqCst);
        self.catalog.commit(CatalogRecord::Put {
            entry: CatalogEntry {
                state: MigrationState::Migrating,
                token: Some(token),
                ..entry
            },
        })?;
        debug!(id = %self.id, token, "migration begun");
        Ok(token)
    }

    fn check_token(&self, entry: &CatalogEntry, token: u64) -> Result<()> {
        if entry.state == MigrationState::Migrating && entry.token == Some(token) {
            Ok(())
        } else {
            Err(Error::TokenStale {
                id: self.id.to_string(),
                presented: token,
                current: entry.token,
            })
        }
    }

    /// Migrating ⇒ Migrated on the userspace backend
    pub fn commit_migration(&self, token: u64) -> Result<CatalogEntry> {
        let entry = self.resolve()?;
        self.check_token(&entry, token)?;

        let entry = CatalogEntry {
            backend: BackendKind::Userspace,
            state: MigrationState::Migrated,
            token: None,
            ..entry
        };
        self.catalog.commit(CatalogRecord::Put {
            entry: entry.clone(),
        })?;
        info!(id = %self.id, token, "migration committed");
        Ok(entry)
    }

    /// Migrating ⇒ Resident. A no-op on files that are not migrating.
    pub fn abort_migration(&self, token: u64) -> Result<CatalogEntry> {
        let entry = self.resolve()?;
        match entry.state {
            MigrationState::Resident | MigrationState::FailedMigration => Ok(entry),
            MigrationState::Migrated => Err(Error::Conflict(format!(
                "{} is already migrated; commit is final",
                self.id
            ))),
            MigrationState::Migrating => {
                self.check_token(&entry, token)?;
                self.settle(entry, MigrationState::Resident)
            }
        }
    }

    /// Abort whatever migration the durable marker names (crash recovery)
    pub fn abort_abandoned(&self) -> Result<Option<CatalogEntry>> {
        let entry = self.resolve()?;
        match (entry.state, entry.token) {
            (MigrationState::Migrating, Some(token)) => self.abort_migration(token).map(Some),
            (MigrationState::Migrating, None) => {
                self.settle(entry, MigrationState::Resident).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Migrating ⇒ FailedMigration
    pub fn fail_migration(&self, token: u64) -> Result<CatalogEntry> {
        let entry = self.resolve()?;
        self.check_token(&entry, token)?;
        let entry = self.settle(entry, MigrationState::FailedMigration)?;
        warn!(id = %self.id, "migration marked failed");
        Ok(entry)
    }

    /// FailedMigration ⇒ Resident
    pub fn reset_failed(&self) -> Result<CatalogEntry> {
        let entry = self.resolve()?;
        match entry.state {
            MigrationState::FailedMigration => self.settle(entry, MigrationState::Resident),
            MigrationState::Resident => Ok(entry),
            state => Err(Error::Conflict(format!("{} is {:?}", self.id, state))),
        }
    }

    fn settle(&self, entry: CatalogEntry, state: MigrationState) -> Result<CatalogEntry> {
        let entry = CatalogEntry {
            state,
            token: None,
            ..entry
        };
        self.catalog.commit(CatalogRecord::Put {
            entry: entry.clone(),
        })?;
        Ok(entry)
    }

    /// Remove the entry
    pub fn remove(&self) -> Result<CatalogEntry> {
        let entry = self.resolve()?;
        self.catalog.commit(CatalogRecord::Remove {
            id: self.id.clone(),
        })?;
        debug!(id = %self.id, "catalog entry removed");
        Ok(entry)
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        self.catalog.locks.release(&[&self.id]);
    }
}

/// Exclusive hold on a rename source and target
pub struct PairGuard<'a> {
    catalog: &'a Catalog,
    from: FileId,
    to: FileId,
}

impl PairGuard<'_> {
    /// Source entry, if any
    pub fn from_entry(&self) -> Result<Option<CatalogEntry>> {
        self.catalog.get(&self.from)
    }

    /// Target entry, if any
    pub fn to_entry(&self) -> Result<Option<CatalogEntry>> {
        self.catalog.get(&self.to)
    }

    /// Record a file found by a fallback probe under the source name
    pub fn adopt_source(&self, class: PlacementClass, backend: BackendKind) -> Result<CatalogEntry> {
        self.catalog.adopt_locked(&self.from, class, backend)
    }

    /// Move the source entry to the target name, replacing any target entry
    pub fn rename(&self) -> Result<CatalogEntry> {
        let entry = self.catalog.resolve(&self.from)?;
        if entry.is_migrating() {
            return Err(Error::Busy(self.from.to_string()));
        }
        if let Some(target) = self.to_entry()? {
            if target.is_migrating() {
                return Err(Error::Busy(self.to.to_string()));
            }
        }

        let entry = CatalogEntry {
            id: self.to.clone(),
            ..entry
        };
        self.catalog.commit(CatalogRecord::Rename {
            from: self.from.clone(),
            entry: entry.clone(),
        })?;
        debug!(from = %self.from, to = %self.to, "catalog entry renamed");
        Ok(entry)
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        self.catalog.locks.release(&[&self.from, &self.to]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn data_file(catalog: &Catalog, name: &str) -> FileId {
        let id = FileId::new(name);
        catalog.create(&id, PlacementClass::Data).unwrap();
        id
    }

    #[test]
    fn test_catalog_create_and_resolve() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(catalog.is_empty());

        let id = FileId::new("wal-01");
        let entry = catalog.create(&id, PlacementClass::Wal).unwrap();
        assert_eq!(entry.backend, BackendKind::Conventional);
        assert_eq!(entry.state, MigrationState::Resident);
        assert_eq!(catalog.resolve(&id).unwrap(), entry);

        assert!(matches!(
            catalog.create(&id, PlacementClass::Data),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            catalog.resolve(&FileId::new("missing")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_catalog_migration_lifecycle() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = data_file(&catalog, "sst-001");

        let token = catalog.begin_migration(&id).unwrap();
        assert_eq!(catalog.resolve(&id).unwrap().state, MigrationState::Migrating);
        assert!(matches!(
            catalog.begin_migration(&id),
            Err(Error::Conflict(_))
        ));

        let entry = catalog.commit_migration(&id, token).unwrap();
        assert_eq!(entry.backend, BackendKind::Userspace);
        assert_eq!(entry.state, MigrationState::Migrated);
        assert!(entry.token.is_none());

        // Committed migrations are never reselected or undone.
        assert!(matches!(
            catalog.begin_migration(&id),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            catalog.abort_migration(&id, token),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_catalog_wal_never_migrates() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = FileId::new("wal-01");
        catalog.create(&id, PlacementClass::Wal).unwrap();

        assert!(matches!(
            catalog.begin_migration(&id),
            Err(Error::InvalidClass(_))
        ));
        assert_eq!(catalog.resolve(&id).unwrap().state, MigrationState::Resident);

        let other = FileId::new("OPTIONS-000001");
        catalog.create(&other, PlacementClass::Other).unwrap();
        assert!(matches!(
            catalog.begin_migration(&other),
            Err(Error::InvalidClass(_))
        ));
    }

    #[test]
    fn test_catalog_stale_token() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = data_file(&catalog, "sst-001");

        let first = catalog.begin_migration(&id).unwrap();
        catalog.abort_migration(&id, first).unwrap();
        let second = catalog.begin_migration(&id).unwrap();
        assert!(second > first);

        assert!(matches!(
            catalog.commit_migration(&id, first),
            Err(Error::TokenStale { current: Some(t), .. }) if t == second
        ));
        assert!(matches!(
            catalog.abort_migration(&id, first),
            Err(Error::TokenStale { .. })
        ));
        catalog.commit_migration(&id, second).unwrap();
    }

    #[test]
    fn test_catalog_abort_is_idempotent() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = data_file(&catalog, "sst-001");

        let token = catalog.begin_migration(&id).unwrap();
        catalog.abort_migration(&id, token).unwrap();
        let entry = catalog.abort_migration(&id, token).unwrap();
        assert_eq!(entry.state, MigrationState::Resident);
        assert!(matches!(
            catalog.commit_migration(&id, token),
            Err(Error::TokenStale { current: None, .. })
        ));
    }

    #[test]
    fn test_catalog_fail_and_reset() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = data_file(&catalog, "sst-001");

        let token = catalog.begin_migration(&id).unwrap();
        let failed = catalog.fail_migration(&id, token).unwrap();
        assert_eq!(failed.state, MigrationState::FailedMigration);
        assert_eq!(failed.backend, BackendKind::Conventional);
        assert!(matches!(
            catalog.begin_migration(&id),
            Err(Error::Conflict(_))
        ));

        let reset = catalog.reset_failed(&id).unwrap();
        assert_eq!(reset.state, MigrationState::Resident);
        catalog.begin_migration(&id).unwrap();
    }

    #[test]
    fn test_catalog_remove_and_rename() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let tmp = FileId::new("MANIFEST.tmp");
        let current = FileId::new("MANIFEST");
        catalog.create(&tmp, PlacementClass::Other).unwrap();
        catalog.create(&current, PlacementClass::Other).unwrap();

        let renamed = catalog.rename(&tmp, &current).unwrap();
        assert_eq!(renamed.id, current);
        assert!(catalog.get(&tmp).unwrap().is_none());
        assert_eq!(catalog.len(), 1);

        catalog.remove(&current).unwrap();
        assert!(matches!(catalog.remove(&current), Err(Error::NotFound(_))));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_rename_rejects_migrating() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = data_file(&catalog, "sst-001");
        catalog.begin_migration(&id).unwrap();

        assert!(matches!(
            catalog.rename(&id, &FileId::new("sst-002")),
            Err(Error::Busy(_))
        ));
    }

    #[test]
    fn test_catalog_adopt() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();

        let conv = catalog
            .adopt(&FileId::new("sst-001"), PlacementClass::Data, BackendKind::Conventional)
            .unwrap();
        assert_eq!(conv.state, MigrationState::Resident);

        let user = catalog
            .adopt(&FileId::new("sst-002"), PlacementClass::Data, BackendKind::Userspace)
            .unwrap();
        assert_eq!(user.state, MigrationState::Migrated);

        let wal = catalog
            .adopt(&FileId::new("wal-09"), PlacementClass::Wal, BackendKind::Userspace)
            .unwrap();
        assert_eq!(wal.class, PlacementClass::Other);

        // Adopting an existing entry keeps it.
        let again = catalog
            .adopt(&FileId::new("sst-001"), PlacementClass::Other, BackendKind::Userspace)
            .unwrap();
        assert_eq!(again, conv);
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = FileId::new("sst-001");
        let token;

        {
            let catalog = Catalog::open(dir.path()).unwrap();
            catalog.create(&FileId::new("wal-01"), PlacementClass::Wal).unwrap();
            catalog.create(&id, PlacementClass::Data).unwrap();
            token = catalog.begin_migration(&id).unwrap();
            // Dropped without checkpoint: state lives only in the log.
        }

        let catalog = Catalog::open(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        let entry = catalog.resolve(&id).unwrap();
        assert_eq!(entry.state, MigrationState::Migrating);
        assert_eq!(entry.token, Some(token));

        // A restarted process never hands out an old token again.
        catalog.abort_migration(&id, token).unwrap();
        assert!(catalog.begin_migration(&id).unwrap() > token);
    }

    #[test]
    fn test_catalog_checkpoint_threshold() {
        let dir = tempdir().unwrap();
        let config = CatalogConfig {
            checkpoint_threshold: 2,
            ..Default::default()
        };

        {
            let catalog = Catalog::open_with_config(dir.path(), config.clone()).unwrap();
            for i in 0..5 {
                data_file(&catalog, &format!("sst-{:03}", i));
            }
        }

        let log_len = fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
        assert!(log_len > LOG_HEADER_LEN);

        let catalog = Catalog::open_with_config(dir.path(), config).unwrap();
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn test_catalog_torn_log_tail() {
        let dir = tempdir().unwrap();

        {
            let catalog = Catalog::open(dir.path()).unwrap();
            data_file(&catalog, "sst-001");
            data_file(&catalog, "sst-002");
        }

        // Simulate a crash halfway through the last append.
        let log_path = dir.path().join(LOG_FILE);
        let len = fs::metadata(&log_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(len - 3).unwrap();

        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(catalog.get(&FileId::new("sst-001")).unwrap().is_some());
        assert!(catalog.get(&FileId::new("sst-002")).unwrap().is_none());

        // The log was folded away; new transitions persist normally.
        data_file(&catalog, "sst-003");
        drop(catalog);
        let catalog = Catalog::open(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_catalog_concurrent_begin_single_winner() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let id = data_file(&catalog, "sst-001");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                let id = id.clone();
                thread::spawn(move || catalog.begin_migration(&id).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_catalog_distinct_files_in_parallel() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let catalog = Arc::clone(&catalog);
                thread::spawn(move || {
                    for i in 0..10 {
                        let id = FileId::new(format!("sst-{}-{}", t, i));
                        catalog.create(&id, PlacementClass::Data).unwrap();
                        let token = catalog.begin_migration(&id).unwrap();
                        catalog.commit_migration(&id, token).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(catalog.len(), 40);
        assert!(catalog
            .entries()
            .unwrap()
            .iter()
            .all(|e| e.state == MigrationState::Migrated));
    }

    #[test]
    fn test_try_lock() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = FileId::new("sst-001");

        let guard = catalog.lock(&id).unwrap();
        assert!(catalog.try_lock(&id).unwrap().is_none());
        drop(guard);
        assert!(catalog.try_lock(&id).unwrap().is_some());
    }
}
