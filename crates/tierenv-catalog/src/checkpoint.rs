//! Catalog checkpoint - the full catalog state written atomically
//!
//! Layout: `[bincode(CheckpointImage)] [crc32: u32 LE]`. A checkpoint is
//! written to a temp file in the catalog directory, fsynced, and renamed over
//! the previous one, so readers only ever see a whole old or a whole new image.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tierenv_core::format_version::{catalog_version, magic, CATALOG_FORMAT_VERSION};
use tierenv_core::{CatalogEntry, Error, Result};

/// Complete catalog state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointImage {
    /// Magic number, must be `magic::CATALOG`
    pub magic: u32,
    /// Format version
    pub version: u16,
    /// Next fencing token to hand out
    pub next_token: u64,
    /// Every catalog entry
    pub entries: Vec<CatalogEntry>,
}

impl Default for CheckpointImage {
    fn default() -> Self {
        Self {
            magic: magic::CATALOG,
            version: CATALOG_FORMAT_VERSION,
            next_token: 1,
            entries: Vec::new(),
        }
    }
}

/// Load a checkpoint; a missing file yields an empty catalog
pub fn load(path: &Path) -> Result<CheckpointImage> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CheckpointImage::default())
        }
        Err(e) => return Err(Error::Io(e)),
    };

    if contents.len() < 4 {
        return Err(Error::Corruption(format!(
            "catalog checkpoint {:?} is truncated",
            path
        )));
    }

    let (body, trailer) = contents.split_at(contents.len() - 4);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(Error::Corruption(format!(
            "catalog checkpoint crc mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }

    let image: CheckpointImage =
        bincode::deserialize(body).map_err(|e| Error::Serialization(e.to_string()))?;

    if image.magic != magic::CATALOG {
        return Err(Error::Corruption(format!(
            "bad catalog magic {:08x}",
            image.magic
        )));
    }
    if !catalog_version().can_read(image.version) {
        return Err(Error::Corruption(format!(
            "unsupported catalog version {}",
            image.version
        )));
    }

    Ok(image)
}

/// Atomically replace the checkpoint at `path` with `image`
pub fn store(path: &Path, image: &CheckpointImage) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidOperation(format!("no parent directory for {:?}", path)))?;

    let mut encoded =
        bincode::serialize(image).map_err(|e| Error::Serialization(e.to_string()))?;
    let crc = crc32fast::hash(&encoded);
    encoded.extend_from_slice(&crc.to_le_bytes());

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&encoded)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    sync_dir(dir)
}

/// Make a rename inside `dir` durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tierenv_core::{FileId, PlacementClass};

    #[test]
    fn test_missing_checkpoint_is_empty() {
        let dir = tempdir().unwrap();
        let image = load(&dir.path().join("CATALOG")).unwrap();
        assert!(image.entries.is_empty());
        assert_eq!(image.next_token, 1);
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CATALOG");

        let image = CheckpointImage {
            next_token: 42,
            entries: vec![CatalogEntry::resident(
                FileId::new("wal-01"),
                PlacementClass::Wal,
            )],
            ..Default::default()
        };
        store(&path, &image).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.next_token, 42);
        assert_eq!(loaded.entries, image.entries);
    }

    #[test]
    fn test_corrupt_checkpoint_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CATALOG");
        store(&path, &CheckpointImage::default()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(load(&path), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_store_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CATALOG");
        store(&path, &CheckpointImage::default()).unwrap();
        store(&path, &CheckpointImage::default()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
