/// Common types and utilities for image access
use memmap2::MmapOptions;
use std::fs::File;
use std::io::{Cursor, ErrorKind};
use std::path::Path;

use crate::error::{EtfsError, Result};

/// A memory-mapped image file for efficient large file access
pub struct BlockDevice {
    _file: File,
    mmap: memmap2::Mmap,
    size: u64,
}

impl BlockDevice {
    /// Open a NAND dump or file-table image
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| EtfsError::read(0, e))?;
        let size = file.metadata().map_err(|e| EtfsError::read(0, e))?.len();

        // The image is a captured snapshot; nothing else writes to it while mapped.
        let mmap = unsafe { MmapOptions::new().map(&file).map_err(|e| EtfsError::read(0, e))? };

        Ok(BlockDevice {
            _file: file,
            mmap,
            size,
        })
    }

    /// Get the size of the image in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whole mapped image
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Read a slice of bytes from the image
    pub fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start + length;

        if end > self.mmap.len() {
            return Err(EtfsError::read(
                offset,
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("read beyond end of image: {} > {}", end, self.mmap.len()),
                ),
            ));
        }

        Ok(&self.mmap[start..end])
    }

    /// Sequential and seekable view over the mapped image
    pub fn cursor(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.mmap[..])
    }
}

/// Content type guessed from the leading bytes of a recovered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentType {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

/// Magic number detection for recovered streams
pub struct MagicDetector;

impl MagicDetector {
    /// Detect content type from first few bytes
    pub fn detect(data: &[u8]) -> Option<ContentType> {
        if data.len() < 12 {
            return None;
        }

        let (mime_type, extension) = match &data[0..4] {
            b"RIFF" if &data[8..12] == b"WAVE" => ("audio/wav", "wav"),
            b"RIFF" if &data[8..12] == b"AVI " => ("video/x-msvideo", "avi"),
            b"OggS" => ("audio/ogg", "ogg"),
            b"fLaC" => ("audio/flac", "flac"),
            [0x49, 0x44, 0x33, _] => ("audio/mpeg", "mp3"), // ID3 tag
            [0xFF, 0xD8, 0xFF, ..] => ("image/jpeg", "jpg"),
            [0x89, 0x50, 0x4E, 0x47] => ("image/png", "png"),
            [0x25, 0x50, 0x44, 0x46] => ("application/pdf", "pdf"),
            [0x50, 0x4B, 0x03, 0x04] => ("application/zip", "zip"),
            [0x7F, 0x45, 0x4C, 0x46] => ("application/x-executable", "elf"),
            _ if Self::is_text(data) => ("text/plain", "txt"),
            _ => return None,
        };

        Some(ContentType {
            mime_type,
            extension,
        })
    }

    /// Check if data looks like text
    pub fn is_text(data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        // Simple heuristic: check if most bytes are printable ASCII
        let printable_count = data
            .iter()
            .take(1024) // Only check first 1KB
            .filter(|&&b| (0x20..=0x7E).contains(&b) || b == 0x09 || b == 0x0A || b == 0x0D)
            .count();

        let total_checked = std::cmp::min(data.len(), 1024);
        (printable_count as f32 / total_checked as f32) > 0.8
    }
}
