use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while scanning, replaying or persisting an ETFS image
#[derive(Error, Debug)]
pub enum EtfsError {
    #[error("I/O error reading image at offset 0x{offset:08x}: {source}")]
    ImageRead {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cluster slot at offset 0x{offset:08x}: {reason}")]
    Decode { offset: u64, reason: String },

    #[error(
        "Seek mismatch replaying file {file_id}: requested 0x{requested:08x}, landed at 0x{actual:08x}"
    )]
    SeekMismatch {
        requested: u64,
        actual: u64,
        file_id: u32,
    },

    /// Non-fatal; the pipeline logs and counts it instead of returning it.
    #[error("No file-table entry for file id {file_id}")]
    MissingMetadata { file_id: u32 },

    #[error("Failed to write recovered output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EtfsError {
    pub(crate) fn read(offset: u64, source: std::io::Error) -> Self {
        EtfsError::ImageRead { offset, source }
    }

    pub(crate) fn decode(offset: u64, reason: impl Into<String>) -> Self {
        EtfsError::Decode {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the error aborts the current pipeline stage
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EtfsError::MissingMetadata { .. })
    }
}

/// Result type alias for ETFS recovery operations
pub type Result<T> = std::result::Result<T, EtfsError>;
