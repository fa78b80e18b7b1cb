//! Migration coordinator
//!
//! Moves data files from the conventional backend to the userspace backend:
//!
//! 1. `begin_migration` under the file lock (skipped if the file is busy)
//! 2. chunked copy with a running checksum
//! 3. sync and verify the destination
//! 4. `commit_migration` with the fencing token
//! 5. delete the conventional copy
//!
//! Any failure before step 4 deletes the partial destination and aborts the
//! migration; the file stays readable from its source throughout. Failed files
//! back off exponentially and are marked `FailedMigration` at the retry ceiling.

use crate::config::{MigrationConfig, MigrationScope};
use crate::job::MigrationJob;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tierenv_backend::BackendSet;
use tierenv_catalog::Catalog;
use tierenv_core::{
    BackendKind, CatalogEntry, Error, FileId, MigrationState, PlacementClass, Result,
    WriteActivity,
};
use tracing::{debug, info, warn};

/// Outcome counters for one migration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Files moved and committed
    pub migrated: usize,
    /// Files skipped because they were being written or changed state
    pub skipped_busy: usize,
    /// Files still waiting out a retry backoff, or left over after a pause
    pub deferred: usize,
    /// Copies that failed verification
    pub integrity_failures: usize,
    /// Copies that failed with a backend error
    pub io_errors: usize,
    /// Files marked `FailedMigration` during this pass
    pub failed: usize,
    /// Bytes copied by committed migrations
    pub bytes_copied: u64,
}

impl MigrationReport {
    fn merge(&mut self, other: &MigrationReport) {
        self.migrated += other.migrated;
        self.skipped_busy += other.skipped_busy;
        self.deferred += other.deferred;
        self.integrity_failures += other.integrity_failures;
        self.io_errors += other.io_errors;
        self.failed += other.failed;
        self.bytes_copied += other.bytes_copied;
    }
}

/// Operator view of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// File identity
    pub id: FileId,
    /// Placement class
    pub class: PlacementClass,
    /// Authoritative backend
    pub backend: BackendKind,
    /// Migration state
    pub state: MigrationState,
    /// Consecutive failed migration attempts
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts: u32,
    next_eligible: Instant,
}

/// Drives migrations for one environment
pub struct MigrationCoordinator {
    catalog: Arc<Catalog>,
    backends: BackendSet,
    activity: Arc<dyn WriteActivity>,
    config: MigrationConfig,
    retries: Mutex<HashMap<FileId, RetryState>>,
    paused: AtomicBool,
}

impl MigrationCoordinator {
    /// Create a coordinator
    pub fn new(
        catalog: Arc<Catalog>,
        backends: BackendSet,
        activity: Arc<dyn WriteActivity>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            catalog,
            backends,
            activity,
            config,
            retries: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
        }
    }

    /// Configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Stop picking up new files; in-flight copies finish
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("migration paused");
    }

    /// Resume after `pause`
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("migration resumed");
    }

    /// Returns true while paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Abort every migration a previous process left behind
    ///
    /// Must run before the environment serves the engine. Returns the number
    /// of migrations aborted.
    pub fn recover(&self) -> Result<usize> {
        let mut aborted = 0;
        for entry in self.catalog.entries()? {
            if !entry.is_migrating() {
                continue;
            }
            let guard = self.catalog.lock(&entry.id)?;
            if guard.abort_abandoned()?.is_some() {
                self.remove_copy(&entry.id, BackendKind::Userspace)?;
                warn!(id = %entry.id, token = ?entry.token, "aborted abandoned migration");
                aborted += 1;
            }
        }
        if aborted > 0 {
            info!(aborted, "migration recovery complete");
        }
        Ok(aborted)
    }

    /// Check that the userspace device holds the catalog's migrated files
    ///
    /// Fails with `Corruption` when the catalog records migrated files and the
    /// device holds none of them, which means the device is not the one the
    /// catalog was written against. Individual missing copies, as left by a
    /// delete cut short by a crash, are only logged. Returns the number missing.
    pub fn check_device(&self) -> Result<usize> {
        let userspace = self.backends.userspace();
        let mut migrated = 0;
        let mut missing = Vec::new();
        for entry in self.catalog.entries()? {
            if entry.backend != BackendKind::Userspace {
                continue;
            }
            migrated += 1;
            if !userspace.exists(entry.id.as_str())? {
                missing.push(entry.id);
            }
        }

        if migrated > 0 && missing.len() == migrated {
            return Err(Error::Corruption(format!(
                "userspace device holds none of the {} migrated files",
                migrated
            )));
        }
        for id in &missing {
            warn!(%id, "migrated file missing from the userspace device");
        }
        Ok(missing.len())
    }

    /// Run one pass over every eligible file in `scope`
    pub fn run_pass(&self, scope: &MigrationScope) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        if self.is_paused() {
            return Ok(report);
        }

        let candidates = self.select(scope, &mut report)?;
        if candidates.is_empty() {
            return Ok(report);
        }

        let next = AtomicUsize::new(0);
        let workers = self.config.workers.clamp(1, candidates.len());
        let results: Vec<thread::Result<MigrationReport>> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let mut local = MigrationReport::default();
                        while let Some(id) = candidates.get(next.fetch_add(1, Ordering::SeqCst)) {
                            if self.is_paused() {
                                local.deferred += 1;
                                continue;
                            }
                            self.migrate_one(id, &mut local);
                        }
                        local
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        for result in results {
            let local = result
                .map_err(|_| Error::InvalidOperation("migration worker panicked".to_string()))?;
            report.merge(&local);
        }

        info!(
            migrated = report.migrated,
            skipped = report.skipped_busy,
            deferred = report.deferred,
            failures = report.integrity_failures + report.io_errors,
            bytes = report.bytes_copied,
            "migration pass finished"
        );
        Ok(report)
    }

    /// Eligible files in identity order
    fn select(&self, scope: &MigrationScope, report: &mut MigrationReport) -> Result<Vec<FileId>> {
        let now = Instant::now();
        let entries = self.catalog.entries()?;
        let mut retries = self.retries.lock().map_err(|_| Error::LockPoisoned)?;
        let mut selected = Vec::new();

        // Forget files the engine deleted or renamed away after a failure.
        let known: HashSet<&FileId> = entries.iter().map(|entry| &entry.id).collect();
        retries.retain(|id, _| known.contains(id));

        for entry in entries {
            if !entry.class.is_migratable()
                || entry.state != MigrationState::Resident
                || entry.backend != BackendKind::Conventional
                || !scope.contains(&entry.id)
            {
                continue;
            }
            if retries
                .get(&entry.id)
                .is_some_and(|r| r.next_eligible > now)
            {
                report.deferred += 1;
                continue;
            }
            if self.activity.is_being_written(&entry.id) {
                report.skipped_busy += 1;
                continue;
            }
            selected.push(entry.id);
        }

        Ok(selected)
    }

    fn migrate_one(&self, id: &FileId, report: &mut MigrationReport) {
        let token = match self.begin(id) {
            Ok(Some(token)) => token,
            Ok(None) => {
                report.skipped_busy += 1;
                return;
            }
            Err(e) => {
                warn!(%id, error = %e, "could not begin migration");
                report.io_errors += 1;
                return;
            }
        };

        let mut job = MigrationJob::new(id.clone(), token);
        let copied = job
            .copy(
                self.backends.conventional(),
                self.backends.userspace(),
                self.config.chunk_size,
            )
            .and_then(|_| job.verify(self.backends.userspace(), self.config.chunk_size));

        match copied {
            Ok(()) => self.finish(&job, report),
            Err(e) => self.give_back(&job, e, report),
        }
    }

    /// Begin under the file lock unless the engine is writing the file
    fn begin(&self, id: &FileId) -> Result<Option<u64>> {
        let guard = self.catalog.lock(id)?;
        if self.activity.is_being_written(id) {
            return Ok(None);
        }
        match guard.begin_migration() {
            Ok(token) => Ok(Some(token)),
            Err(e) if e.is_transition_error() => {
                debug!(%id, error = %e, "skipping file");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn finish(&self, job: &MigrationJob, report: &mut MigrationReport) {
        let id = job.id();
        match self.catalog.commit_migration(id, job.token()) {
            Ok(_) => {}
            Err(e) => {
                warn!(%id, error = %e, "commit rejected");
                // A newer migration owns the destination name; leave it be.
                let superseded = matches!(
                    self.catalog.get(id),
                    Ok(Some(entry)) if entry.is_migrating() && entry.token != Some(job.token())
                );
                if !superseded {
                    if let Err(e) = self.remove_copy(id, BackendKind::Userspace) {
                        warn!(%id, error = %e, "failed to discard copy");
                    }
                    match self.catalog.abort_migration(id, job.token()) {
                        Ok(_) | Err(Error::TokenStale { .. }) => {}
                        Err(e) => warn!(%id, error = %e, "could not abort after rejected commit"),
                    }
                }
                if e.is_transition_error() {
                    report.skipped_busy += 1;
                } else {
                    report.io_errors += 1;
                }
                return;
            }
        }

        if let Ok(mut retries) = self.retries.lock() {
            retries.remove(id);
        }
        report.migrated += 1;
        report.bytes_copied += job.bytes_copied();
        info!(%id, bytes = job.bytes_copied(), "file migrated");

        if self.config.delete_source {
            if let Err(e) = self.remove_source(id) {
                warn!(%id, error = %e, "source copy left for the garbage pass");
            }
        }
    }

    /// Delete the partial copy, then abort or fail the migration
    fn give_back(&self, job: &MigrationJob, cause: Error, report: &mut MigrationReport) {
        let id = job.id();
        match &cause {
            Error::IntegrityFailure { .. } => report.integrity_failures += 1,
            _ => report.io_errors += 1,
        }
        warn!(%id, error = %cause, "migration attempt failed");

        if let Err(e) = self.remove_copy(id, BackendKind::Userspace) {
            warn!(%id, error = %e, "failed to delete partial copy");
        }

        let attempts = self.record_failure(id);
        let settled = if attempts >= self.config.max_retries {
            report.failed += 1;
            warn!(%id, attempts, "retry ceiling reached, marking migration failed");
            self.catalog.fail_migration(id, job.token())
        } else {
            self.catalog.abort_migration(id, job.token())
        };
        if let Err(e) = settled {
            warn!(%id, error = %e, "could not settle failed migration");
        }
    }

    fn record_failure(&self, id: &FileId) -> u32 {
        let mut retries = match self.retries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = retries.entry(id.clone()).or_insert(RetryState {
            attempts: 0,
            next_eligible: Instant::now(),
        });
        state.attempts += 1;
        state.next_eligible = Instant::now() + self.config.backoff(state.attempts);
        state.attempts
    }

    /// Delete the conventional copy of a committed file
    fn remove_source(&self, id: &FileId) -> Result<()> {
        let _guard = self.catalog.lock(id)?;
        let entry = self.catalog.resolve(id)?;
        if entry.backend == BackendKind::Userspace {
            self.remove_copy(id, BackendKind::Conventional)?;
        }
        Ok(())
    }

    fn remove_copy(&self, id: &FileId, kind: BackendKind) -> Result<bool> {
        match self.backends.get(kind).delete(id.as_str()) {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete copies that are not authoritative: conventional copies of
    /// migrated files and userspace copies of files that never finished
    ///
    /// Returns the number of copies removed.
    pub fn collect_garbage(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.catalog.entries()? {
            let guard = self.catalog.lock(&entry.id)?;
            let Some(current) = guard.entry()? else {
                continue;
            };
            if current.is_migrating() {
                continue;
            }
            if self.remove_copy(&current.id, current.backend.other())? {
                debug!(id = %current.id, backend = %current.backend.other(), "collected stale copy");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "garbage pass finished");
        }
        Ok(removed)
    }

    /// Status of every catalog entry
    pub fn status(&self) -> Result<Vec<FileStatus>> {
        let retries = self.retries.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(self
            .catalog
            .entries()?
            .into_iter()
            .map(|entry: CatalogEntry| FileStatus {
                attempts: retries.get(&entry.id).map_or(0, |r| r.attempts),
                id: entry.id,
                class: entry.class,
                backend: entry.backend,
                state: entry.state,
            })
            .collect())
    }

    /// Files that reached the retry ceiling
    pub fn failures(&self) -> Result<Vec<FileId>> {
        Ok(self
            .catalog
            .entries()?
            .into_iter()
            .filter(|e| e.state == MigrationState::FailedMigration)
            .map(|e| e.id)
            .collect())
    }

    /// Make a failed file eligible again with a fresh retry budget
    pub fn retry_failed(&self, id: &FileId) -> Result<()> {
        self.catalog.reset_failed(id)?;
        let mut retries = self.retries.lock().map_err(|_| Error::LockPoisoned)?;
        retries.remove(id);
        info!(%id, "failed migration reset");
        Ok(())
    }
}
