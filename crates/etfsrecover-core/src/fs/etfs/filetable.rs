//! ETFS `.filetable` reader
//!
//! The file table is a flat array of 64-byte records; a file id is the
//! index of its record. The table ends at the first record whose parent id
//! is -1.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::fs::common::BlockDevice;
use crate::recovery::metadata::{FileMetadata, MetadataLookup};

/// Bytes per file-table record
pub const FTABLE_ENTRY_SIZE: usize = 64;
/// Bytes reserved for the short filename
pub const FNAME_SHORT_LEN: usize = 32;
/// `efid` of a deleted entry
pub const FID_DELETED: i16 = -1;
/// `pfid` of the dummy entry closing the table
pub const FID_END: i16 = -1;

/// A raw file-table record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTableEntry {
    /// File id of extra info attached to this file
    pub efid: i16,
    /// File id of the parent directory
    pub pfid: i16,
    pub mode: i32,
    pub uid: i32,
    pub gid: i32,
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
    /// Byte size, always 0 for directories
    pub size: i32,
    pub name: [u8; FNAME_SHORT_LEN],
}

impl FileTableEntry {
    /// Parse one 64-byte record
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FTABLE_ENTRY_SIZE {
            anyhow::bail!("Insufficient data for file-table entry: {} bytes", data.len());
        }

        let mut cursor = Cursor::new(data);
        let efid = cursor.read_i16::<LittleEndian>()?;
        let pfid = cursor.read_i16::<LittleEndian>()?;
        let mode = cursor.read_i32::<LittleEndian>()?;
        let uid = cursor.read_i32::<LittleEndian>()?;
        let gid = cursor.read_i32::<LittleEndian>()?;
        let atime = cursor.read_i32::<LittleEndian>()?;
        let mtime = cursor.read_i32::<LittleEndian>()?;
        let ctime = cursor.read_i32::<LittleEndian>()?;
        let size = cursor.read_i32::<LittleEndian>()?;
        let mut name = [0u8; FNAME_SHORT_LEN];
        cursor.read_exact(&mut name)?;

        Ok(FileTableEntry {
            efid,
            pfid,
            mode,
            uid,
            gid,
            atime,
            mtime,
            ctime,
            size,
            name,
        })
    }

    /// Name bytes up to the first NUL
    pub fn filename(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(FNAME_SHORT_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn is_deleted(&self) -> bool {
        self.efid == FID_DELETED
    }

    /// Short status tag used in listings
    pub fn status(&self) -> &'static str {
        if self.is_deleted() {
            "DEL"
        } else {
            "OK"
        }
    }

    pub fn declared_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok()
    }

    pub fn modified_time(&self) -> Option<DateTime<Utc>> {
        unix_time(self.mtime)
    }

    pub fn accessed_time(&self) -> Option<DateTime<Utc>> {
        unix_time(self.atime)
    }

    pub fn changed_time(&self) -> Option<DateTime<Utc>> {
        unix_time(self.ctime)
    }
}

fn unix_time(secs: i32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs as i64, 0).single()
}

/// Parsed file table
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    entries: Vec<FileTableEntry>,
}

impl FileTable {
    /// Parse a file table from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::with_capacity(data.len() / FTABLE_ENTRY_SIZE);

        for (index, record) in data.chunks_exact(FTABLE_ENTRY_SIZE).enumerate() {
            let entry = FileTableEntry::parse(record)
                .with_context(|| format!("file-table entry {} at offset 0x{:08x}", index, index * FTABLE_ENTRY_SIZE))?;

            if entry.pfid == FID_END {
                break;
            }

            tracing::debug!(
                "Fid: {:04} - {} - pfid:{:03} - size:{:8} - {}",
                index,
                entry.status(),
                entry.pfid,
                entry.size,
                entry.filename()
            );
            entries.push(entry);
        }

        let table = FileTable { entries };
        tracing::info!(
            "File table entries found: defined {} - deleted {}",
            table.defined_count(),
            table.deleted_count()
        );
        Ok(table)
    }

    /// Read and parse a `.filetable` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = BlockDevice::open(path)
            .with_context(|| format!("opening file table {}", path.display()))?;
        Self::from_device(&device)
    }

    pub fn from_device(device: &BlockDevice) -> Result<Self> {
        Self::parse(device.bytes())
    }

    pub fn entries(&self) -> &[FileTableEntry] {
        &self.entries
    }

    pub fn get(&self, file_id: u32) -> Option<&FileTableEntry> {
        self.entries.get(file_id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deleted_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_deleted()).count()
    }

    pub fn defined_count(&self) -> usize {
        self.entries.len() - self.deleted_count()
    }

    /// Join names along the parent chain up to the root
    pub fn full_path(&self, file_id: u32) -> Option<String> {
        let mut entry = self.get(file_id)?;
        let mut path = entry.filename();
        let mut visited = HashSet::from([file_id]);

        while entry.pfid > 0 {
            let parent_id = entry.pfid as u32;
            if !visited.insert(parent_id) {
                tracing::warn!("Parent loop in file table at fid {}", parent_id);
                break;
            }
            let Some(parent) = self.get(parent_id) else {
                tracing::warn!("Fid {} references missing parent {}", file_id, parent_id);
                break;
            };
            path = format!("{}/{}", parent.filename(), path);
            entry = parent;
        }

        Some(path)
    }
}

impl MetadataLookup for FileTable {
    fn lookup(&self, file_id: u32) -> Option<FileMetadata> {
        let entry = self.get(file_id)?;
        Some(FileMetadata {
            filename: entry.filename(),
            path: self.full_path(file_id),
            parent_id: u32::try_from(entry.pfid).ok(),
            deleted: entry.is_deleted(),
            declared_size: entry.declared_size(),
            mode: entry.mode as u32,
            modified_time: entry.modified_time(),
        })
    }
}
