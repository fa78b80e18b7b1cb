//! # tierenv Migration
//!
//! Progressive, crash-safe migration of data files from the conventional
//! backend to the userspace backend.
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
//! - [`MigrationCoordinator`]: selection, bounded-concurrency copy passes,
//!   retry backoff, crash recovery and the garbage pass
//! - [`MigrationJob`]: one in-flight chunked copy with its running checksum
//! - [`MigrationService`]: a background thread running passes at an interval
//!
//! The coordinator is the only writer of migration state transitions. Which
//! files a pass considers is decided by the caller through [`MigrationScope`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod job;
pub mod service;

pub use config::{MigrationConfig, MigrationScope};
pub use coordinator::{FileStatus, MigrationCoordinator, MigrationReport};
pub use job::MigrationJob;
pub use service::MigrationService;
