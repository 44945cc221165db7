//! End-to-end recovery over synthetic NAND dumps
//!
//! Images are built slot by slot: a 2048-byte payload followed by the
//! 16-byte transaction record.

use etfsrecover_core::fs::etfs::{UNUSED_CLUSTER, UNUSED_FID};
use etfsrecover_core::recovery::{order_for_replay, scan_transactions};
use etfsrecover_core::{
    recover_image, write_recovered_files, FileMetadata, FileTable, NoMetadata, RecoveryConfig,
    RecoveryEngine, RecoveryStatus, SizeStatus, TransactionRecord, CLUSTER_SIZE, DATA_SIZE,
};
use std::collections::HashMap;
use std::io::Cursor;

fn record(file_id: u32, logical_cluster: u32, sequence: u32) -> TransactionRecord {
    TransactionRecord {
        file_id,
        logical_cluster,
        cluster_count: 1,
        transaction_area_code: 0,
        data_area_code: 0,
        sequence,
    }
}

fn push_slot(image: &mut Vec<u8>, fill: u8, record: TransactionRecord) {
    image.extend(std::iter::repeat(fill).take(DATA_SIZE));
    image.extend_from_slice(&record.to_bytes());
}

fn push_unused(image: &mut Vec<u8>) {
    push_slot(image, 0xFF, record(UNUSED_FID, UNUSED_CLUSTER, u32::MAX));
}

fn filetable_entry(efid: i16, pfid: i16, size: i32, name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&efid.to_le_bytes());
    out.extend_from_slice(&pfid.to_le_bytes());
    for _ in 0..6 {
        out.extend_from_slice(&0i32.to_le_bytes()); // mode, uid, gid, atime, mtime, ctime
    }
    out.extend_from_slice(&size.to_le_bytes());
    let mut name_bytes = [0u8; 32];
    name_bytes[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&name_bytes);
    out
}

#[test]
fn test_newer_sequence_supersedes_older_write() {
    // slot 0: fid 5 cluster 0 seq 10, slot 1: same position seq 20, slot 2: unused
    let mut image = Vec::new();
    push_slot(&mut image, 0xA0, record(5, 0, 10));
    push_slot(&mut image, 0xB1, record(5, 0, 20));
    push_unused(&mut image);

    let result = RecoveryEngine::new(Cursor::new(image), RecoveryConfig::default())
        .execute_recovery(&NoMetadata)
        .unwrap();

    assert_eq!(result.files.len(), 1);
    let file = &result.files[0];
    assert_eq!(file.file_id, 5);
    assert_eq!(file.data.len(), DATA_SIZE);
    assert!(file.data.iter().all(|&b| b == 0xB1));
    assert_eq!(file.last_sequence, 20);
    assert_eq!(result.statistics.scan.transactions, 2);
    assert_eq!(result.statistics.scan.unused_slots, 1);
    assert_eq!(result.statistics.replay.superseded_writes, 1);
}

#[test]
fn test_last_writer_wins_independent_of_physical_order() {
    // Three copies of the same position scattered out of sequence order
    let mut image = Vec::new();
    push_slot(&mut image, 0x02, record(9, 1, 300));
    push_slot(&mut image, 0x10, record(9, 0, 50));
    push_slot(&mut image, 0x03, record(9, 1, 700));
    push_slot(&mut image, 0x01, record(9, 1, 100));

    let result = RecoveryEngine::new(Cursor::new(image), RecoveryConfig::default())
        .execute_recovery(&NoMetadata)
        .unwrap();

    let data = &result.files[0].data;
    assert_eq!(data.len(), 2 * DATA_SIZE);
    assert!(data[..DATA_SIZE].iter().all(|&b| b == 0x10));
    assert!(data[DATA_SIZE..].iter().all(|&b| b == 0x03));
}

#[test]
fn test_declared_size_gives_exact_length() {
    let declared = 3 * DATA_SIZE as u64 + 123;
    let mut image = Vec::new();
    for cluster in (0..4u32).rev() {
        push_slot(&mut image, cluster as u8 + 1, record(2, cluster, 10 + cluster));
    }

    let mut metadata = HashMap::new();
    metadata.insert(2, FileMetadata::new("song.wav", Some(declared), false));

    let result = RecoveryEngine::new(Cursor::new(image), RecoveryConfig::default())
        .execute_recovery(&metadata)
        .unwrap();

    let file = &result.files[0];
    assert_eq!(file.size(), declared);
    assert_eq!(&file.data[3 * DATA_SIZE..], vec![4u8; 123].as_slice());
    assert_eq!(file.size_status, SizeStatus::Declared { declared_size: declared });
    assert!(file.is_complete());
}

#[test]
fn test_gap_is_tolerated() {
    let mut image = Vec::new();
    push_slot(&mut image, 0x0A, record(4, 0, 1));
    push_slot(&mut image, 0x0C, record(4, 2, 2));

    let result = RecoveryEngine::new(Cursor::new(image), RecoveryConfig::default())
        .execute_recovery(&NoMetadata)
        .unwrap();

    let file = &result.files[0];
    assert_eq!(file.missing_clusters, vec![1]);
    assert_eq!(file.data.len(), 2 * DATA_SIZE);
    assert!(file.data[DATA_SIZE..].iter().all(|&b| b == 0x0C));
    assert_eq!(result.statistics.materialize.files_with_gaps, 1);
}

#[test]
fn test_sentinel_only_image_recovers_nothing() {
    let mut image = Vec::new();
    for _ in 0..3 {
        push_unused(&mut image);
    }
    image.extend_from_slice(&[0u8; 7]);

    let (entries, stats) = scan_transactions(Cursor::new(&image)).unwrap();
    assert!(entries.is_empty());
    assert_eq!(stats.trailing_bytes, 7);

    let result = RecoveryEngine::new(Cursor::new(image), RecoveryConfig::default())
        .execute_recovery(&NoMetadata)
        .unwrap();
    assert!(result.files.is_empty());
}

#[test]
fn test_ordering_is_repeatable() {
    let mut image = Vec::new();
    push_slot(&mut image, 1, record(1, 0, 5));
    push_slot(&mut image, 2, record(2, 0, 5));
    push_slot(&mut image, 3, record(1, 1, 1));

    let (entries, _) = scan_transactions(Cursor::new(&image)).unwrap();
    let first = order_for_replay(entries.clone());
    let second = order_for_replay(entries);
    assert_eq!(first, second);
    let offsets: Vec<u64> = first.iter().map(|e| e.physical_offset).collect();
    assert_eq!(offsets, vec![2 * CLUSTER_SIZE as u64, 0, CLUSTER_SIZE as u64]);
}

#[test]
fn test_recover_and_write_from_disk() {
    let dir = tempfile::TempDir::new().unwrap();

    // fid 0 root, 1 live file, 2 deleted file, 3 end marker; fid 7 has no entry
    let mut table = Vec::new();
    table.extend(filetable_entry(0, 0, 0, ""));
    table.extend(filetable_entry(0, 0, 100, "Loop01.wav"));
    table.extend(filetable_entry(-1, 0, 2 * DATA_SIZE as i32, "Loop02.wav"));
    table.extend(filetable_entry(0, -1, 0, ""));
    let table_path = dir.path().join(".filetable");
    std::fs::write(&table_path, &table).unwrap();

    let mut image = Vec::new();
    push_slot(&mut image, 0x11, record(1, 0, 1));
    push_slot(&mut image, 0x21, record(2, 0, 2));
    push_unused(&mut image);
    push_slot(&mut image, 0x22, record(2, 1, 3));
    push_slot(&mut image, 0x97, record(7, 0, 4));
    let image_path = dir.path().join("nand.img");
    std::fs::write(&image_path, &image).unwrap();

    let filetable = FileTable::from_path(&table_path).unwrap();
    let result = recover_image(&image_path, &filetable, RecoveryConfig::default(), None).unwrap();
    assert_eq!(result.files.len(), 3);
    assert_eq!(result.deleted_files().count(), 1);
    assert_eq!(result.statistics.materialize.missing_metadata, 1);

    let out = dir.path().join("recovered");
    let report = write_recovered_files(&result, &out).unwrap();
    assert_eq!(report.recovered_files, 3);
    assert_eq!(report.deleted_files, 1);
    assert_eq!(report.failed_files, 0);
    assert!(report
        .recovery_details
        .iter()
        .all(|d| matches!(d.status, RecoveryStatus::Success) && d.sha256.is_some()));

    let live = std::fs::read(out.join("0001_Loop01.wav")).unwrap();
    assert_eq!(live, vec![0x11; 100]);

    let deleted = std::fs::read(out.join("deleted").join("0002_Loop02.wav")).unwrap();
    assert_eq!(deleted.len(), 2 * DATA_SIZE);
    assert!(deleted[DATA_SIZE..].iter().all(|&b| b == 0x22));

    let orphan = std::fs::read(out.join("fid_0007.bin")).unwrap();
    assert_eq!(orphan.len(), DATA_SIZE);

    let report_path = dir.path().join("report.json");
    report.save_json(&report_path).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["deleted_files"], 1);
    assert_eq!(json["statistics"]["scan"]["transactions"], 4);
}
