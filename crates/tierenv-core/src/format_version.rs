//! File format versions for tierenv metadata
//!
//! Catalog checkpoints and the catalog log header carry these so a newer
//! binary can refuse to misread an older layout.

/// Catalog checkpoint format version
pub const CATALOG_FORMAT_VERSION: u16 = 1;

/// Catalog record log format version
pub const CATALOG_LOG_FORMAT_VERSION: u16 = 1;

/// Magic numbers for file validation
pub mod magic {
    /// Catalog checkpoint magic: "TCAT"
    pub const CATALOG: u32 = 0x5443_4154;

    /// Catalog record log magic: "TCLG"
    pub const CATALOG_LOG: u32 = 0x5443_4C47;
}

/// Version compatibility information
pub struct FormatVersion {
    /// Current version of this format
    pub current: u16,
    /// Minimum supported version for reading
    pub min_read: u16,
    /// Minimum supported version for writing
    pub min_write: u16,
}

impl FormatVersion {
    /// Check if a version can be read
    pub fn can_read(&self, version: u16) -> bool {
        version >= self.min_read && version <= self.current
    }

    /// Check if a version can be written
    pub fn can_write(&self, version: u16) -> bool {
        version >= self.min_write && version <= self.current
    }
}

/// Catalog checkpoint format version info
pub fn catalog_version() -> FormatVersion {
    FormatVersion {
        current: CATALOG_FORMAT_VERSION,
        min_read: 1,
        min_write: 1,
    }
}

/// Catalog record log format version info
pub fn catalog_log_version() -> FormatVersion {
    FormatVersion {
        current: CATALOG_LOG_FORMAT_VERSION,
        min_read: 1,
        min_write: 1,
    }
}
