//! Conventional backend - plain files under a root directory
//!
//! Names map to relative paths below the root; `/` separated names create
//! subdirectories on demand. This is the only backend with memory-mapping.

use crate::Backend;
use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tierenv_core::{BackendKind, Error, FileStat, OpenMode, Result};
use tracing::debug;

/// Filesystem-backed storage rooted at a directory
#[derive(Debug, Clone)]
pub struct ConventionalBackend {
    root: PathBuf,
}

impl ConventionalBackend {
    /// Open (creating if needed) a backend rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this backend
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a name to a path, refusing anything that escapes the root
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::InvalidOperation("empty file name".to_string()));
        }
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidOperation(format!(
                "file name must be relative without '..': {}",
                name
            )));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Collect every regular file below `dir` as a root-relative name
    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            let relative = path
                .strip_prefix(&self.root)
                .map_err(|_| Error::InvalidOperation("file outside backend root".into()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
        Ok(())
    }
}

impl Backend for ConventionalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Conventional
    }

    fn create(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        Self::ensure_parent(&path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::from_io(e, name))?;
        debug!(name, "created conventional file");
        Ok(())
    }

    fn open(&self, name: &str, mode: OpenMode) -> Result<FileStat> {
        let path = self.path_for(name)?;
        let file = match mode {
            OpenMode::Read => File::open(&path),
            OpenMode::Append => OpenOptions::new().append(true).open(&path),
        }
        .map_err(|e| Error::from_io(e, name))?;
        let size = file.metadata()?.len();
        Ok(FileStat { size })
    }

    fn read(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        let mut file = File::open(&path).map_err(|e| Error::from_io(e, name))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<u64> {
        let path = self.path_for(name)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Error::from_io(e, name))?;
        file.write_all(data)?;
        Ok(file.metadata()?.len())
    }

    fn sync(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Error::from_io(e, name))?;
        file.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.path_for(from)?;
        let dst = self.path_for(to)?;
        if !src.is_file() {
            return Err(Error::NotFound(from.to_string()));
        }
        Self::ensure_parent(&dst)?;
        fs::rename(&src, &dst).map_err(|e| Error::from_io(e, from))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|e| Error::from_io(e, name))?;
        debug!(name, "deleted conventional file");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if self.root.exists() {
            self.collect(&self.root, &mut names)?;
        }
        names.retain(|n| n.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn stat(&self, name: &str) -> Result<FileStat> {
        let path = self.path_for(name)?;
        let metadata = fs::metadata(&path).map_err(|e| Error::from_io(e, name))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(FileStat {
            size: metadata.len(),
        })
    }

    fn supports_memory_map(&self) -> bool {
        true
    }

    fn memory_map(&self, name: &str) -> Result<Mmap> {
        let path = self.path_for(name)?;
        let file = File::open(&path).map_err(|e| Error::from_io(e, name))?;
        // SAFETY: the mapping is read-only, and files on this backend are only
        // ever appended to, so mapped bytes are never rewritten underneath us.
        let map = unsafe { Mmap::map(&file)? };
        Ok(map)
    }
}
