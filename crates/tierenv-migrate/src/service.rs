//! Background migration service
//!
//! Runs coordinator passes on a dedicated thread at a fixed interval until
//! stopped. Pausing the coordinator makes passes return immediately; the
//! thread keeps ticking so a resume takes effect on the next interval.

use crate::config::MigrationScope;
use crate::coordinator::MigrationCoordinator;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tierenv_core::{Error, Result};
use tracing::{debug, warn};

/// Handle to a running background migration thread
pub struct MigrationService {
    stop_flag: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl MigrationService {
    /// Start running passes over `scope` every `interval`
    pub fn spawn(
        coordinator: Arc<MigrationCoordinator>,
        scope: MigrationScope,
        interval: Duration,
    ) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let passes = Arc::new(AtomicU64::new(0));

        let handle = {
            let stop_flag = Arc::clone(&stop_flag);
            let passes = Arc::clone(&passes);
            thread::Builder::new()
                .name("tierenv-migrate".to_string())
                .spawn(move || {
                    debug!(?interval, "migration service started");
                    while !stop_flag.load(Ordering::SeqCst) {
                        match coordinator.run_pass(&scope) {
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "migration pass failed"),
                        }
                        passes.fetch_add(1, Ordering::SeqCst);

                        let deadline = Instant::now() + interval;
                        while !stop_flag.load(Ordering::SeqCst) {
                            let now = Instant::now();
                            if now >= deadline {
                                break;
                            }
                            thread::park_timeout(deadline - now);
                        }
                    }
                    debug!("migration service stopped");
                })?
        };

        Ok(Self {
            stop_flag,
            passes,
            handle: Some(handle),
        })
    }

    /// Passes completed so far
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Returns true until `stop` is called
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait for the current pass to finish
    pub fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            handle
                .join()
                .map_err(|_| Error::InvalidOperation("migration service panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for MigrationService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "migration service did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use tempfile::tempdir;
    use tierenv_backend::{Backend, BackendSet, ConventionalBackend, UserspaceBackend, UserspaceConfig};
    use tierenv_catalog::Catalog;
    use tierenv_core::{BackendKind, FileId, NoWriteActivity, PlacementClass};

    #[test]
    fn test_service_migrates_in_background() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path().join("catalog")).unwrap());
        let conventional = ConventionalBackend::open(dir.path().join("files")).unwrap();
        let backends = BackendSet::new(
            Arc::new(conventional.clone()),
            Arc::new(UserspaceBackend::new(UserspaceConfig::default())),
        )
        .unwrap();
        let coordinator = Arc::new(MigrationCoordinator::new(
            Arc::clone(&catalog),
            backends,
            Arc::new(NoWriteActivity),
            MigrationConfig::default(),
        ));

        let id = FileId::new("sst-001");
        catalog.create(&id, PlacementClass::Data).unwrap();
        conventional.create("sst-001").unwrap();
        conventional.append("sst-001", b"payload").unwrap();

        let mut service = MigrationService::spawn(
            Arc::clone(&coordinator),
            MigrationScope::All,
            Duration::from_millis(10),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while catalog.resolve(&id).unwrap().backend != BackendKind::Userspace {
            assert!(Instant::now() < deadline, "background pass never ran");
            thread::sleep(Duration::from_millis(5));
        }

        service.stop().unwrap();
        assert!(!service.is_running());
        assert!(service.passes() >= 1);
    }

    #[test]
    fn test_stop_is_prompt() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let backends = BackendSet::new(
            Arc::new(ConventionalBackend::open(dir.path().join("files")).unwrap()),
            Arc::new(UserspaceBackend::new(UserspaceConfig::default())),
        )
        .unwrap();
        let coordinator = Arc::new(MigrationCoordinator::new(
            catalog,
            backends,
            Arc::new(NoWriteActivity),
            MigrationConfig::default(),
        ));

        let mut service =
            MigrationService::spawn(coordinator, MigrationScope::All, Duration::from_secs(3600))
                .unwrap();
        let started = Instant::now();
        service.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
