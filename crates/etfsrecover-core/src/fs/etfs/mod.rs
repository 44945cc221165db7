/// ETFS (embedded transaction filesystem) NAND dump support
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Write};

use super::common::BlockDevice;
use crate::error::{EtfsError, Result};

// Sub-modules
pub mod filetable;
pub mod transaction;

pub use filetable::{FileTable, FileTableEntry};
pub use transaction::{
    AreaCode, ClusterSlot, TransactionRecord, AREA_CODE_MASK, CLUSTER_SIZE, DATA_SIZE,
    TRANS_SIZE, UNUSED_CLUSTER, UNUSED_FID,
};

/// Fill `buf` from `reader`, stopping early only at end of input.
///
/// Returns the number of bytes read; anything short of `buf.len()` means EOF.
pub(crate) fn read_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Slot-level overview of a NAND dump
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub image_size: u64,
    pub slot_count: u64,
    pub used_slots: u64,
    pub unused_slots: u64,
    pub trailing_bytes: u64,
    pub distinct_files: usize,
    pub min_sequence: Option<u32>,
    pub max_sequence: Option<u32>,
    pub transaction_areas: BTreeMap<AreaCode, u64>,
    pub data_areas: BTreeMap<AreaCode, u64>,
}

impl ImageInfo {
    /// Walk every complete slot of an in-memory image
    pub fn collect(image: &[u8]) -> Result<Self> {
        let mut info = ImageInfo {
            image_size: image.len() as u64,
            trailing_bytes: (image.len() % CLUSTER_SIZE) as u64,
            ..Default::default()
        };
        let mut files = BTreeSet::new();

        for (index, window) in image.chunks_exact(CLUSTER_SIZE).enumerate() {
            let offset = (index * CLUSTER_SIZE) as u64;
            let slot = ClusterSlot::parse(window, offset)?;
            info.slot_count += 1;

            if slot.record.is_unused() {
                info.unused_slots += 1;
                continue;
            }

            info.used_slots += 1;
            files.insert(slot.record.file_id);
            info.min_sequence = Some(info.min_sequence.map_or(slot.record.sequence, |s| s.min(slot.record.sequence)));
            info.max_sequence = Some(info.max_sequence.map_or(slot.record.sequence, |s| s.max(slot.record.sequence)));
            *info.transaction_areas.entry(slot.record.transaction_area()).or_default() += 1;
            *info.data_areas.entry(slot.record.data_area()).or_default() += 1;
        }

        info.distinct_files = files.len();
        Ok(info)
    }
}

/// Get ETFS image information
pub fn get_filesystem_info(device: &BlockDevice) -> Result<String> {
    let info = ImageInfo::collect(device.bytes())?;

    let histogram = |codes: &BTreeMap<AreaCode, u64>| {
        if codes.is_empty() {
            return "none".to_string();
        }
        codes
            .iter()
            .map(|(code, count)| format!("{}={}", code, count))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let sequence_range = match (info.min_sequence, info.max_sequence) {
        (Some(min), Some(max)) => format!("{} - {}", min, max),
        _ => "n/a".to_string(),
    };

    Ok(format!(
        "ETFS NAND Dump\n\
         - Image Size: {} bytes\n\
         - Cluster Size: {} bytes ({} data + {} transaction)\n\
         - Cluster Slots: {}\n\
         - Used Slots: {}\n\
         - Unused Slots: {}\n\
         - Trailing Bytes: {}\n\
         - Distinct File IDs: {}\n\
         - Sequence Range: {}\n\
         - Transaction Areas: {}\n\
         - Data Areas: {}",
        info.image_size,
        CLUSTER_SIZE,
        DATA_SIZE,
        TRANS_SIZE,
        info.slot_count,
        info.used_slots,
        info.unused_slots,
        info.trailing_bytes,
        info.distinct_files,
        sequence_range,
        histogram(&info.transaction_areas),
        histogram(&info.data_areas),
    ))
}

/// Outcome of stripping transaction records from a dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripStats {
    pub slots_kept: u64,
    pub slots_skipped: u64,
    pub trailing_bytes: u64,
    pub bytes_written: u64,
}

/// Copy the payload of every written slot to `sink`, dropping the records.
///
/// Useful for handing a raw data stream to signature carvers.
pub fn strip_transaction_records<R: Read, W: Write>(mut source: R, mut sink: W) -> Result<StripStats> {
    let mut stats = StripStats::default();
    let mut window = vec![0u8; CLUSTER_SIZE];
    let mut offset = 0u64;

    loop {
        let filled = read_window(&mut source, &mut window).map_err(|e| EtfsError::read(offset, e))?;
        if filled < CLUSTER_SIZE {
            stats.trailing_bytes = filled as u64;
            break;
        }

        let slot = ClusterSlot::parse(&window, offset)?;
        if slot.record.logical_cluster == UNUSED_CLUSTER {
            stats.slots_skipped += 1;
        } else {
            sink.write_all(slot.payload).map_err(|e| EtfsError::Output {
                path: "<strip sink>".into(),
                source: e,
            })?;
            stats.slots_kept += 1;
            stats.bytes_written += DATA_SIZE as u64;
        }
        offset += CLUSTER_SIZE as u64;
    }

    tracing::info!(
        "Stripped {} slots ({} skipped, {} trailing bytes ignored)",
        stats.slots_kept,
        stats.slots_skipped,
        stats.trailing_bytes
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn slot(fill: u8, record: TransactionRecord) -> Vec<u8> {
        let mut out = vec![fill; DATA_SIZE];
        out.extend_from_slice(&record.to_bytes());
        out
    }

    fn record(file_id: u32, logical_cluster: u32, sequence: u32, tacode: u8) -> TransactionRecord {
        TransactionRecord {
            file_id,
            logical_cluster,
            cluster_count: 1,
            transaction_area_code: tacode,
            data_area_code: 0,
            sequence,
        }
    }

    #[test]
    fn test_image_info_counts() {
        let mut image = Vec::new();
        image.extend(slot(1, record(5, 0, 10, 0)));
        image.extend(slot(2, record(6, 0, 30, 5)));
        image.extend(slot(0xFF, record(UNUSED_FID, UNUSED_CLUSTER, u32::MAX, 3)));
        image.extend_from_slice(&[0u8; 100]);

        let info = ImageInfo::collect(&image).unwrap();
        assert_eq!(info.slot_count, 3);
        assert_eq!(info.used_slots, 2);
        assert_eq!(info.unused_slots, 1);
        assert_eq!(info.trailing_bytes, 100);
        assert_eq!(info.distinct_files, 2);
        assert_eq!(info.min_sequence, Some(10));
        assert_eq!(info.max_sequence, Some(30));
        assert_eq!(info.transaction_areas.get(&AreaCode::CrcError), Some(&1));
    }

    #[test]
    fn test_strip_keeps_written_payloads_only() {
        let mut image = Vec::new();
        image.extend(slot(0x11, record(5, 0, 1, 0)));
        image.extend(slot(0xEE, record(UNUSED_FID, UNUSED_CLUSTER, 0, 2)));
        image.extend(slot(0x22, record(5, 1, 2, 0)));
        image.extend_from_slice(&[0x33; 10]);

        let mut out = Vec::new();
        let stats = strip_transaction_records(Cursor::new(image), &mut out).unwrap();
        assert_eq!(stats.slots_kept, 2);
        assert_eq!(stats.slots_skipped, 1);
        assert_eq!(stats.trailing_bytes, 10);
        assert_eq!(out.len(), 2 * DATA_SIZE);
        assert!(out[..DATA_SIZE].iter().all(|&b| b == 0x11));
        assert!(out[DATA_SIZE..].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_read_window_handles_short_reads() {
        struct Trickle(Vec<u8>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }

        let mut reader = Trickle(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 1);
    }
}
