//! Cluster replay
//!
//! Applies ordered transactions to per-file cluster maps. Entries arrive in
//! ascending sequence order, so an unconditional insert leaves the newest
//! write at every logical position.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Seek, SeekFrom};

use super::scanner::ScannedEntry;
use crate::error::{EtfsError, Result};
use crate::fs::etfs::{read_window, ClusterSlot, TransactionRecord, CLUSTER_SIZE, DATA_SIZE};

/// Replayed payload of one logical cluster
pub type ClusterData = Box<[u8; DATA_SIZE]>;

/// Reconstruction state of a single file
#[derive(Debug, Clone)]
pub struct FileReconstruction {
    pub file_id: u32,
    /// Most recently applied transaction
    pub last_transaction: TransactionRecord,
    /// Logical cluster index to winning payload
    pub clusters: HashMap<u32, ClusterData>,
}

impl FileReconstruction {
    fn new(last_transaction: TransactionRecord) -> Self {
        Self {
            file_id: last_transaction.file_id,
            last_transaction,
            clusters: HashMap::new(),
        }
    }

    /// Logical cluster indices in file order
    pub fn sorted_clusters(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.clusters.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Indices below the highest present one that never received a write
    pub fn missing_clusters(&self) -> Vec<u32> {
        let Some(&last) = self.clusters.keys().max() else {
            return Vec::new();
        };
        (0..last).filter(|k| !self.clusters.contains_key(k)).collect()
    }
}

/// Counters gathered while replaying
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStatistics {
    pub clusters_replayed: u64,
    /// Inserts that replaced an older write at the same position
    pub superseded_writes: u64,
    /// Entries skipped by the file filter without being read
    pub filtered_entries: u64,
}

/// Per-file state produced by replay, keyed by file id
pub type ReplayState = BTreeMap<u32, FileReconstruction>;

/// Replays ordered transactions against a seekable image
pub struct ClusterReplayer<R> {
    source: R,
    file_filter: Option<BTreeSet<u32>>,
    window: Vec<u8>,
}

impl<R: Read + Seek> ClusterReplayer<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            file_filter: None,
            window: vec![0u8; CLUSTER_SIZE],
        }
    }

    /// Restrict replay to the given file ids
    pub fn with_file_filter(mut self, filter: Option<BTreeSet<u32>>) -> Self {
        self.file_filter = filter;
        self
    }

    /// Replay `ordered` entries, which must already be in recovery order
    pub fn replay(
        &mut self,
        ordered: &[ScannedEntry],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(ReplayState, ReplayStatistics)> {
        let mut state = ReplayState::new();
        let mut stats = ReplayStatistics::default();

        for (index, entry) in ordered.iter().enumerate() {
            let file_id = entry.transaction.file_id;
            if let Some(filter) = &self.file_filter {
                if !filter.contains(&file_id) {
                    stats.filtered_entries += 1;
                    continue;
                }
            }

            let payload = self.read_payload(entry)?;
            let logical_cluster = entry.transaction.logical_cluster;

            tracing::debug!(
                "Replaying fid {} cluster {} from offset {:08x} (sequence {})",
                file_id,
                logical_cluster,
                entry.physical_offset,
                entry.transaction.sequence
            );

            let file = state
                .entry(file_id)
                .or_insert_with(|| FileReconstruction::new(entry.transaction));
            file.last_transaction = entry.transaction;
            if file.clusters.insert(logical_cluster, payload).is_some() {
                stats.superseded_writes += 1;
            }
            stats.clusters_replayed += 1;

            progress(index + 1, ordered.len());
        }

        tracing::info!(
            "Replayed {} clusters into {} files ({} superseded writes)",
            stats.clusters_replayed,
            state.len(),
            stats.superseded_writes
        );
        Ok((state, stats))
    }

    fn read_payload(&mut self, entry: &ScannedEntry) -> Result<ClusterData> {
        let requested = entry.physical_offset;
        let file_id = entry.transaction.file_id;

        let actual = self
            .source
            .seek(SeekFrom::Start(requested))
            .map_err(|e| EtfsError::read(requested, e))?;
        if actual != requested {
            return Err(EtfsError::SeekMismatch {
                requested,
                actual,
                file_id,
            });
        }

        let filled = read_window(&mut self.source, &mut self.window).map_err(|e| EtfsError::read(requested, e))?;
        if filled < CLUSTER_SIZE {
            return Err(EtfsError::decode(
                requested,
                format!("slot for fid {} truncated to {} bytes", file_id, filled),
            ));
        }

        let slot = ClusterSlot::parse(&self.window, requested)?;
        if slot.record != entry.transaction {
            return Err(EtfsError::decode(
                requested,
                format!(
                    "record changed since scan for fid {}: scanned [{}], read [{}]",
                    file_id, entry.transaction, slot.record
                ),
            ));
        }

        let mut payload: ClusterData = Box::new([0u8; DATA_SIZE]);
        payload.copy_from_slice(slot.payload);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::orderer::order_for_replay;
    use crate::recovery::scanner::scan_transactions;
    use std::io::{self, Cursor};

    fn slot(fill: u8, file_id: u32, logical_cluster: u32, sequence: u32) -> Vec<u8> {
        let mut out = vec![fill; DATA_SIZE];
        out.extend_from_slice(
            &TransactionRecord {
                file_id,
                logical_cluster,
                cluster_count: 1,
                transaction_area_code: 0,
                data_area_code: 0,
                sequence,
            }
            .to_bytes(),
        );
        out
    }

    fn replay_image(image: Vec<u8>, filter: Option<BTreeSet<u32>>) -> (ReplayState, ReplayStatistics) {
        let (entries, _) = scan_transactions(Cursor::new(&image)).unwrap();
        let ordered = order_for_replay(entries);
        ClusterReplayer::new(Cursor::new(&image))
            .with_file_filter(filter)
            .replay(&ordered, |_, _| {})
            .unwrap()
    }

    #[test]
    fn test_newest_sequence_wins_regardless_of_position() {
        let mut image = Vec::new();
        image.extend(slot(0xBB, 5, 0, 20)); // newer write first on flash
        image.extend(slot(0xAA, 5, 0, 10));

        let (state, stats) = replay_image(image, None);
        let file = &state[&5];
        assert_eq!(file.clusters.len(), 1);
        assert!(file.clusters[&0].iter().all(|&b| b == 0xBB));
        assert_eq!(file.last_transaction.sequence, 20);
        assert_eq!(stats.superseded_writes, 1);
    }

    #[test]
    fn test_files_are_kept_apart() {
        let mut image = Vec::new();
        image.extend(slot(0x01, 1, 0, 1));
        image.extend(slot(0x02, 2, 0, 2));
        image.extend(slot(0x03, 1, 1, 3));

        let (state, stats) = replay_image(image, None);
        assert_eq!(state.len(), 2);
        assert_eq!(state[&1].sorted_clusters(), vec![0, 1]);
        assert_eq!(state[&2].sorted_clusters(), vec![0]);
        assert_eq!(stats.clusters_replayed, 3);
    }

    #[test]
    fn test_file_filter_skips_other_files() {
        let mut image = Vec::new();
        image.extend(slot(0x01, 1, 0, 1));
        image.extend(slot(0x02, 173, 0, 2));

        let (state, stats) = replay_image(image, Some(BTreeSet::from([173])));
        assert_eq!(state.keys().copied().collect::<Vec<_>>(), vec![173]);
        assert_eq!(stats.filtered_entries, 1);
    }

    #[test]
    fn test_missing_clusters_reported() {
        let mut image = Vec::new();
        image.extend(slot(0x01, 9, 0, 1));
        image.extend(slot(0x03, 9, 3, 2));

        let (state, _) = replay_image(image, None);
        assert_eq!(state[&9].missing_clusters(), vec![1, 2]);
    }

    #[test]
    fn test_seek_mismatch_is_fatal() {
        struct Stuck(Cursor<Vec<u8>>);
        impl Read for Stuck {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.0.read(buf)
            }
        }
        impl Seek for Stuck {
            fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
                Ok(0)
            }
        }

        let mut image = slot(0x01, 4, 0, 1);
        image.extend(slot(0x02, 4, 1, 2));
        let (entries, _) = scan_transactions(Cursor::new(&image)).unwrap();
        let ordered = order_for_replay(entries);

        let err = ClusterReplayer::new(Stuck(Cursor::new(image)))
            .replay(&ordered, |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            EtfsError::SeekMismatch { requested, actual: 0, file_id: 4 } if requested == CLUSTER_SIZE as u64
        ));
    }

    #[test]
    fn test_changed_record_is_decode_error() {
        let image = slot(0x01, 4, 0, 1);
        let (entries, _) = scan_transactions(Cursor::new(&image)).unwrap();

        let altered = slot(0x01, 4, 0, 99);
        let err = ClusterReplayer::new(Cursor::new(altered))
            .replay(&entries, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, EtfsError::Decode { offset: 0, .. }));
    }
}
