//! Error types for tierenv.

use std::fmt;

/// The main error type for tierenv operations.
#[derive(Debug)]
pub enum Error {
    /// The file identity is unknown to the catalog and to every backend
    NotFound(String),

    /// The file identity is already in use
    AlreadyExists(String),

    /// The placement class forbids the requested operation (WAL migration)
    InvalidClass(String),

    /// A concurrent or out-of-order transition on the same file
    Conflict(String),

    /// A fencing token was superseded by a newer migration
    TokenStale {
        /// File the token was presented for
        id: String,
        /// Token presented by the caller
        presented: u64,
        /// Token currently recorded, if any
        current: Option<u64>,
    },

    /// A write raced a migration in progress; the caller should retry
    Busy(String),

    /// The backend lacks the requested capability (memory-mapping)
    Unsupported(String),

    /// Copied bytes did not match the source after migration
    IntegrityFailure {
        /// File being migrated
        id: String,
        /// Checksum of the source copy
        expected: u32,
        /// Checksum of the destination copy
        actual: u32,
    },

    /// I/O error passed through from a backend
    Io(std::io::Error),

    /// A lock was poisoned (internal error)
    LockPoisoned,

    /// Serialization/deserialization error
    Serialization(String),

    /// Persisted metadata failed validation
    Corruption(String),

    /// Invalid operation
    InvalidOperation(String),
}

impl Error {
    /// Returns true if the caller is expected to retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// Returns true for catalog transition errors the migration coordinator
    /// absorbs instead of surfacing.
    pub fn is_transition_error(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::TokenStale { .. } | Error::InvalidClass(_)
        )
    }

    /// Returns true if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Map an I/O error for `name` onto the taxonomy.
    ///
    /// Missing and duplicate files get their own variants, everything else
    /// passes through untouched.
    pub fn from_io(err: std::io::Error, name: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(name.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(name.to_string()),
            _ => Error::Io(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(id) => write!(f, "Not found: {}", id),
            Error::AlreadyExists(id) => write!(f, "Already exists: {}", id),
            Error::InvalidClass(msg) => write!(f, "Invalid placement class: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflicting transition: {}", msg),
            Error::TokenStale {
                id,
                presented,
                current,
            } => match current {
                Some(current) => write!(
                    f,
                    "Stale fencing token for {}: presented {}, current {}",
                    id, presented, current
                ),
                None => write!(
                    f,
                    "Stale fencing token for {}: presented {}, no migration active",
                    id, presented
                ),
            },
            Error::Busy(id) => write!(f, "Busy: {} is being migrated", id),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::IntegrityFailure {
                id,
                expected,
                actual,
            } => write!(
                f,
                "Integrity failure for {}: expected crc {:08x}, got {:08x}",
                id, expected, actual
            ),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::LockPoisoned => write!(f, "Lock poisoned"),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for tierenv operations.
pub type Result<T> = std::result::Result<T, Error>;
