//! Operator-facing migration control
//!
//! The trigger policy stays outside the coordinator: an operator (or an
//! embedding application) decides when to run passes and over which scope.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tierenv_core::{Error, FileId, Result};
use tierenv_migrate::{
    FileStatus, MigrationCoordinator, MigrationReport, MigrationScope, MigrationService,
};
use tracing::info;

/// Start, pause and inspect migration for one environment
pub struct MigrationControl {
    coordinator: Arc<MigrationCoordinator>,
    service: Mutex<Option<MigrationService>>,
}

impl MigrationControl {
    pub(crate) fn new(coordinator: Arc<MigrationCoordinator>) -> Self {
        Self {
            coordinator,
            service: Mutex::new(None),
        }
    }

    /// Run one migration pass over `scope` on the calling thread
    ///
    /// ```rust,no_run
    /// use tierenv::{EnvConfig, Environment, MigrationScope, UserspaceBackend};
    ///
    /// let config = EnvConfig::new("./data");
    /// let device = UserspaceBackend::new(config.userspace.clone());
    /// let env = Environment::open(config, device)?;
    /// let report = env.migration().start_migration(MigrationScope::Prefix("sst".into()))?;
    /// println!("migrated {} files", report.migrated);
    /// # Ok::<(), tierenv::Error>(())
    /// ```
    pub fn start_migration(&self, scope: MigrationScope) -> Result<MigrationReport> {
        self.coordinator.run_pass(&scope)
    }

    /// Stop starting new copies until `resume`
    pub fn pause(&self) {
        self.coordinator.pause();
    }

    /// Resume after `pause`
    pub fn resume(&self) {
        self.coordinator.resume();
    }

    /// Returns true while paused
    pub fn is_paused(&self) -> bool {
        self.coordinator.is_paused()
    }

    /// Placement and migration state of every known file
    pub fn migration_status(&self) -> Result<Vec<FileStatus>> {
        self.coordinator.status()
    }

    /// Files that reached the retry ceiling
    pub fn list_failures(&self) -> Result<Vec<FileId>> {
        self.coordinator.failures()
    }

    /// Put a failed file back in the eligible pool
    pub fn retry_failed(&self, id: &FileId) -> Result<()> {
        self.coordinator.retry_failed(id)
    }

    /// Remove stale copies left on the non-authoritative backend
    pub fn collect_garbage(&self) -> Result<usize> {
        self.coordinator.collect_garbage()
    }

    /// Run passes over `scope` on a background thread every `interval`
    pub fn start_background(&self, scope: MigrationScope, interval: Duration) -> Result<()> {
        let mut service = self.service.lock().map_err(|_| Error::LockPoisoned)?;
        if service.is_some() {
            return Err(Error::InvalidOperation(
                "background migration already running".to_string(),
            ));
        }
        *service = Some(MigrationService::spawn(
            Arc::clone(&self.coordinator),
            scope,
            interval,
        )?);
        info!(?interval, "background migration started");
        Ok(())
    }

    /// Stop the background thread, if any, waiting for its current pass
    pub fn stop_background(&self) -> Result<()> {
        let service = self
            .service
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .take();
        if let Some(mut service) = service {
            service.stop()?;
            info!(passes = service.passes(), "background migration stopped");
        }
        Ok(())
    }

    /// Returns true while a background thread is running
    pub fn is_background_running(&self) -> bool {
        self.service
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }
}
