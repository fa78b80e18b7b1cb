//! # tierenv
//!
//! A tiered file environment for storage engines: files are born on the
//! ordinary filesystem and data files migrate, in the background and without
//! downtime, to a blob store on a user-space driven block device.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierenv::{
//!     EnvConfig, Environment, FileId, MigrationScope, PlacementClass, UserspaceBackend,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // The userspace device outlives every environment opened over it.
//!     let config = EnvConfig::new("./data");
//!     let device = UserspaceBackend::new(config.userspace.clone());
//!     let env = Environment::open(config.clone(), device.clone())?;
//!
//!     // The engine tags every file with a placement class at creation.
//!     let sst = FileId::new("sst-001");
//!     env.create(&sst, PlacementClass::Data)?;
//!     env.append(&sst, &[0u8; 4096])?;
//!     env.sync(&sst)?;
//!
//!     // Move data files to the userspace backend.
//!     let report = env.migration().start_migration(MigrationScope::All)?;
//!     assert_eq!(report.migrated, 1);
//!
//!     // Reads are routed to wherever the file lives now.
//!     assert_eq!(env.read(&sst, 0, 4096)?.len(), 4096);
//!     env.close()?;
//!
//!     // Reopen over the same device.
//!     let env = Environment::open(config, device)?;
//!     assert_eq!(env.read(&sst, 0, 4096)?.len(), 4096);
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - WAL files never leave the conventional backend and can always be
//!   memory-mapped
//! - A file is readable at every instant of a migration, including across
//!   crashes at any step
//! - Writes racing a migration fail with [`Error::Busy`] instead of landing on
//!   the wrong backend
//! - A file missing from the catalog is found by probing both backends

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub mod control;
pub mod logging;

pub use control::MigrationControl;

// Core types
pub use tierenv_core::{
    BackendKind, CatalogEntry, Error, FileId, FileStat, MigrationState, OpenMode,
    PlacementClass, Result, WriteActivity,
};

// Backends
pub use tierenv_backend::{
    Backend, BackendRef, BackendSet, ConventionalBackend, Mmap, UserspaceBackend,
    UserspaceConfig,
};

// Catalog
pub use tierenv_catalog::{Catalog, CatalogConfig, SyncMode};

// Routing
pub use tierenv_routing::{PlacementPolicy, RoutedFile, RoutingEnv};

// Migration
pub use tierenv_migrate::{
    FileStatus, MigrationConfig, MigrationCoordinator, MigrationReport, MigrationScope,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Catalog subdirectory of the data directory
const CATALOG_DIR: &str = "catalog";
/// Conventional backend root under the data directory
const FILES_DIR: &str = "files";

/// Environment configuration
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Data directory holding the catalog and the conventional files
    pub data_dir: PathBuf,
    /// Catalog persistence
    pub catalog: CatalogConfig,
    /// Migration coordinator
    pub migration: MigrationConfig,
    /// Userspace device
    pub userspace: UserspaceConfig,
    /// Classification of files found by the fallback probe
    pub policy: PlacementPolicy,
}

impl EnvConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            catalog: CatalogConfig::default(),
            migration: MigrationConfig::default(),
            userspace: UserspaceConfig::default(),
            policy: PlacementPolicy::default(),
        }
    }

    /// Set the migration configuration
    pub fn with_migration(mut self, migration: MigrationConfig) -> Self {
        self.migration = migration;
        self
    }

    /// Set the catalog configuration
    pub fn with_catalog(mut self, catalog: CatalogConfig) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the userspace device configuration
    pub fn with_userspace(mut self, userspace: UserspaceConfig) -> Self {
        self.userspace = userspace;
        self
    }

    /// Directory of the catalog files
    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join(CATALOG_DIR)
    }

    /// Root of the conventional backend
    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join(FILES_DIR)
    }
}

/// A tiered file environment
///
/// Owns the catalog, both backends, the routing layer and the migration
/// coordinator. Opening runs crash recovery before returning, so the engine
/// never sees a file stuck in `Migrating` from a previous process.
pub struct Environment {
    config: EnvConfig,
    routing: RoutingEnv,
    control: MigrationControl,
}

impl Environment {
    /// Open an environment over a userspace device
    ///
    /// The device must be the one the catalog under `data_dir` was written
    /// against; opening over a device that holds none of the migrated files
    /// fails with `Corruption`.
    pub fn open(config: EnvConfig, userspace: UserspaceBackend) -> Result<Self> {
        let conventional = ConventionalBackend::open(config.files_dir())?;
        let backends = BackendSet::new(Arc::new(conventional), Arc::new(userspace))?;
        Self::open_with_backends(config, backends)
    }

    /// Open an environment over caller-supplied backends
    pub fn open_with_backends(config: EnvConfig, backends: BackendSet) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let catalog = Arc::new(Catalog::open_with_config(
            config.catalog_dir(),
            config.catalog.clone(),
        )?);

        let routing =
            RoutingEnv::with_policy(Arc::clone(&catalog), backends.clone(), config.policy.clone());
        let coordinator = Arc::new(MigrationCoordinator::new(
            catalog,
            backends,
            Arc::new(routing.clone()),
            config.migration.clone(),
        ));
        let recovered = coordinator.recover()?;
        let missing = coordinator.check_device()?;

        info!(
            data_dir = ?config.data_dir,
            files = routing.catalog().len(),
            recovered,
            missing,
            "environment opened"
        );

        Ok(Self {
            config,
            routing,
            control: MigrationControl::new(coordinator),
        })
    }

    /// Configuration this environment was opened with
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Data directory
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// The routing layer (cheap to clone into engine threads)
    pub fn routing(&self) -> &RoutingEnv {
        &self.routing
    }

    /// The placement catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        self.routing.catalog()
    }

    /// Operator migration control
    pub fn migration(&self) -> &MigrationControl {
        &self.control
    }

    /// Create a file on the conventional backend
    pub fn create(&self, id: &FileId, class: PlacementClass) -> Result<CatalogEntry> {
        self.routing.create(id, class)
    }

    /// Open a file for reading or appending
    pub fn open_file(&self, id: &FileId, mode: OpenMode) -> Result<RoutedFile> {
        self.routing.open(id, mode)
    }

    /// Read up to `len` bytes at `offset`
    pub fn read(&self, id: &FileId, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.routing.read(id, offset, len)
    }

    /// Append bytes; fails `Busy` while the file is migrating
    pub fn append(&self, id: &FileId, data: &[u8]) -> Result<u64> {
        self.routing.append(id, data)
    }

    /// Make appended bytes durable
    pub fn sync(&self, id: &FileId) -> Result<()> {
        self.routing.sync(id)
    }

    /// Size of a file
    pub fn stat(&self, id: &FileId) -> Result<FileStat> {
        self.routing.stat(id)
    }

    /// Every file starting with `prefix`
    pub fn list(&self, prefix: &str) -> Result<Vec<FileId>> {
        self.routing.list(prefix)
    }

    /// Delete a file
    pub fn delete(&self, id: &FileId) -> Result<()> {
        self.routing.delete(id)
    }

    /// Rename a file, replacing `to`
    pub fn rename(&self, from: &FileId, to: &FileId) -> Result<()> {
        self.routing.rename(from, to)
    }

    /// Memory-map a file; fails `Unsupported` off the conventional backend
    pub fn memory_map(&self, id: &FileId) -> Result<Mmap> {
        self.routing.memory_map(id)
    }

    /// Where a file lives
    pub fn resolve(&self, id: &FileId) -> Result<CatalogEntry> {
        self.routing.resolve(id)
    }

    /// Stop background migration and checkpoint the catalog
    pub fn close(self) -> Result<()> {
        self.control.stop_background()?;
        self.routing.catalog().checkpoint()
    }
}
