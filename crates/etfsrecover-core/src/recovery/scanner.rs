//! Transaction scanner
//!
//! Streams an image in `CLUSTER_SIZE` windows and yields every slot whose
//! record is not the unused sentinel. Only the trailing record of each window
//! is decoded; payloads are read again during replay.

use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};

use crate::error::{EtfsError, Result};
use crate::fs::etfs::{read_window, TransactionRecord, CLUSTER_SIZE, DATA_SIZE};

/// A used slot and where it lives in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedEntry {
    /// Byte offset of the slot; always a multiple of `CLUSTER_SIZE`
    pub physical_offset: u64,
    pub transaction: TransactionRecord,
}

/// Counters gathered while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub slots_read: u64,
    pub unused_slots: u64,
    pub transactions: u64,
    /// Transactions whose transaction area reads ok or ECC-corrected
    pub valid_transactions: u64,
    pub invalid_transactions: u64,
    pub trailing_bytes: u64,
}

/// Lazy iterator over the used slots of an image
pub struct TransactionScanner<R> {
    source: R,
    window: Vec<u8>,
    offset: u64,
    finished: bool,
    stats: ScanStatistics,
}

impl<R: Read> TransactionScanner<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            window: vec![0u8; CLUSTER_SIZE],
            offset: 0,
            finished: false,
            stats: ScanStatistics::default(),
        }
    }

    /// Counters for the slots consumed so far
    pub fn statistics(&self) -> &ScanStatistics {
        &self.stats
    }

    /// Drain the scanner, collecting every entry or the first error
    pub fn collect_entries(mut self) -> Result<(Vec<ScannedEntry>, ScanStatistics)> {
        let mut entries = Vec::new();
        for entry in self.by_ref() {
            entries.push(entry?);
        }

        tracing::info!(
            "Scanned {} slots: {} transactions ({} valid, {} invalid), {} unused",
            self.stats.slots_read,
            self.stats.transactions,
            self.stats.valid_transactions,
            self.stats.invalid_transactions,
            self.stats.unused_slots
        );
        if self.stats.trailing_bytes > 0 {
            tracing::debug!("Ignored {} trailing bytes after last slot", self.stats.trailing_bytes);
        }

        Ok((entries, self.stats))
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn next_slot(&mut self) -> Result<Option<ScannedEntry>> {
        loop {
            let offset = self.offset;
            let filled = read_window(&mut self.source, &mut self.window).map_err(|e| EtfsError::read(offset, e))?;
            if filled < CLUSTER_SIZE {
                self.stats.trailing_bytes = filled as u64;
                return Ok(None);
            }

            self.offset += CLUSTER_SIZE as u64;
            self.stats.slots_read += 1;

            let transaction = TransactionRecord::parse(&self.window[DATA_SIZE..], offset)?;
            if transaction.is_unused() {
                self.stats.unused_slots += 1;
                continue;
            }

            self.stats.transactions += 1;
            if transaction.transaction_area().is_valid() {
                self.stats.valid_transactions += 1;
            } else {
                self.stats.invalid_transactions += 1;
            }

            tracing::trace!("Offset: {:08x} - {}", offset, transaction);
            return Ok(Some(ScannedEntry {
                physical_offset: offset,
                transaction,
            }));
        }
    }
}

impl<R: Read + Seek> TransactionScanner<R> {
    /// Restart the scan from the first slot
    pub fn rewind(&mut self) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(0))
            .map_err(|e| EtfsError::read(0, e))?;
        self.offset = 0;
        self.finished = false;
        self.stats = ScanStatistics::default();
        Ok(())
    }
}

impl<R: Read> Iterator for TransactionScanner<R> {
    type Item = Result<ScannedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_slot() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                // A failed read ends the scan
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Scan a whole image into memory
pub fn scan_transactions<R: Read>(source: R) -> Result<(Vec<ScannedEntry>, ScanStatistics)> {
    TransactionScanner::new(source).collect_entries()
}
