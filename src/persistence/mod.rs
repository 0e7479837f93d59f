//! Persistence for region data: the tagged binary document format, region
//! files, and the background world loader.

pub mod document;
pub mod loader;
pub mod region_file;
pub mod steps;

pub use document::{Document, Value};
pub use loader::{RegionCallback, WorldLoader, WorldLoaderBuilder};
pub use region_file::RegionFiles;
pub use steps::{EntityStep, RegionIoStep, SliceStep, StructureStep, TileEntityStep};

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors that can occur while reading or writing region data.
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    Serialization(String),
    Deserialization(String),
    Compression(String),
    VersionMismatch { expected: u32, found: u32 },
    CorruptedData(String),
    /// The operation was abandoned because shutdown was requested.
    Cancelled,
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {}", e),
            PersistenceError::Serialization(e) => write!(f, "Serialization error: {}", e),
            PersistenceError::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            PersistenceError::Compression(e) => write!(f, "Compression error: {}", e),
            PersistenceError::VersionMismatch { expected, found } => {
                write!(f, "Version mismatch: expected {}, found {}", expected, found)
            }
            PersistenceError::CorruptedData(e) => write!(f, "Corrupted data: {}", e),
            PersistenceError::Cancelled => write!(f, "Operation cancelled by shutdown"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err)
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(err: bincode::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Shorthand for a malformed-document error.
pub(crate) fn corrupted(reason: impl Into<String>) -> PersistenceError {
    PersistenceError::CorruptedData(reason.into())
}
