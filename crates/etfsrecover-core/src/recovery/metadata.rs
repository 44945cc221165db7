//! File-metadata lookup used during materialization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the file table knows about a file id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    /// Filename joined with its parent directories, when resolvable
    pub path: Option<String>,
    pub parent_id: Option<u32>,
    pub deleted: bool,
    /// Byte size recorded in the table; absent when the table holds no usable size
    pub declared_size: Option<u64>,
    pub mode: u32,
    pub modified_time: Option<DateTime<Utc>>,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, declared_size: Option<u64>, deleted: bool) -> Self {
        Self {
            filename: filename.into(),
            path: None,
            parent_id: None,
            deleted,
            declared_size,
            mode: 0,
            modified_time: None,
        }
    }
}

/// Source of file metadata keyed by file id
pub trait MetadataLookup: Sync {
    fn lookup(&self, file_id: u32) -> Option<FileMetadata>;
}

impl MetadataLookup for HashMap<u32, FileMetadata> {
    fn lookup(&self, file_id: u32) -> Option<FileMetadata> {
        self.get(&file_id).cloned()
    }
}

/// Lookup for images recovered without a file table
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataLookup for NoMetadata {
    fn lookup(&self, _file_id: u32) -> Option<FileMetadata> {
        None
    }
}
