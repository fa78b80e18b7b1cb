//! # tierenv Core
//!
//! Core types shared by every tierenv crate: the error taxonomy, the file
//! placement data model and the catalog format constants.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of tierenv.**
//!
//! Users should depend on the main `tierenv` crate instead, which provides
//! the stable public API.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format_version;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    BackendKind, CatalogEntry, FileId, FileStat, MigrationState, NoWriteActivity, OpenMode,
    PlacementClass, WriteActivity,
};
