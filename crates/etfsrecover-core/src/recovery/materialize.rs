//! File materialization
//!
//! Concatenates each file's replayed clusters in logical order. The last
//! cluster is cut to the size declared in the file table; without a declared
//! size the whole cluster is kept and the file is flagged as degraded.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::metadata::{FileMetadata, MetadataLookup};
use super::replay::{FileReconstruction, ReplayState};
use crate::error::EtfsError;
use crate::fs::common::MagicDetector;
use crate::fs::etfs::DATA_SIZE;

/// How the final cluster length was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeStatus {
    /// Final cluster cut to `declared_size mod DATA_SIZE`
    Declared { declared_size: u64 },
    /// No declared size; final cluster written whole (best effort)
    Untruncated,
}

/// A reconstructed file ready to be persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveredFile {
    pub file_id: u32,
    /// Path from the file table, or a fallback built from the file id
    pub label: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub metadata: Option<FileMetadata>,
    pub deleted: bool,
    pub cluster_count: usize,
    /// Logical clusters with no surviving write
    pub missing_clusters: Vec<u32>,
    pub size_status: SizeStatus,
    pub mime_type: Option<String>,
    pub extension: Option<String>,
    pub last_sequence: u32,
}

impl RecoveredFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// All clusters up to the last one are present
    pub fn is_complete(&self) -> bool {
        self.missing_clusters.is_empty()
    }

    /// Status tag used in listings
    pub fn status(&self) -> &'static str {
        if self.deleted {
            "DEL"
        } else {
            "OK"
        }
    }
}

/// Counters gathered while materializing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeStatistics {
    pub files: u64,
    pub deleted_files: u64,
    pub missing_metadata: u64,
    pub untruncated_files: u64,
    pub files_with_gaps: u64,
    pub bytes: u64,
}

/// Length of the final cluster for a file of `declared_size` bytes
pub fn last_cluster_len(declared_size: u64) -> usize {
    match (declared_size % DATA_SIZE as u64) as usize {
        0 => DATA_SIZE,
        remainder => remainder,
    }
}

/// Build the byte stream of one file
pub fn materialize_file(file: &FileReconstruction, metadata: Option<FileMetadata>) -> RecoveredFile {
    let keys = file.sorted_clusters();
    let declared_size = metadata.as_ref().and_then(|m| m.declared_size);

    let mut data = Vec::with_capacity(keys.len() * DATA_SIZE);
    for (position, key) in keys.iter().enumerate() {
        let payload = &file.clusters[key][..];
        let is_last = position + 1 == keys.len();
        match declared_size {
            Some(size) if is_last => data.extend_from_slice(&payload[..last_cluster_len(size)]),
            _ => data.extend_from_slice(payload),
        }
    }

    let size_status = match declared_size {
        Some(declared_size) => SizeStatus::Declared { declared_size },
        None => SizeStatus::Untruncated,
    };

    let missing_clusters = file.missing_clusters();
    let content_type = MagicDetector::detect(&data);
    let label = match &metadata {
        Some(meta) => meta
            .path
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| Some(meta.filename.clone()).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| fallback_label(file.file_id)),
        None => fallback_label(file.file_id),
    };

    RecoveredFile {
        file_id: file.file_id,
        label,
        deleted: metadata.as_ref().is_some_and(|m| m.deleted),
        metadata,
        cluster_count: keys.len(),
        missing_clusters,
        size_status,
        mime_type: content_type.map(|c| c.mime_type.to_string()),
        extension: content_type.map(|c| c.extension.to_string()),
        last_sequence: file.last_transaction.sequence,
        data,
    }
}

fn fallback_label(file_id: u32) -> String {
    format!("fid_{:04}", file_id)
}

/// Materialize every replayed file, in ascending file id order
pub fn materialize_all(
    state: &ReplayState,
    lookup: &dyn MetadataLookup,
    parallel: bool,
) -> (Vec<RecoveredFile>, MaterializeStatistics) {
    let files: Vec<&FileReconstruction> = state.values().collect();
    let build = |file: &&FileReconstruction| materialize_file(file, lookup.lookup(file.file_id));

    let recovered: Vec<RecoveredFile> = if parallel {
        files.par_iter().map(build).collect()
    } else {
        files.iter().map(build).collect()
    };

    let mut stats = MaterializeStatistics::default();
    for file in &recovered {
        stats.files += 1;
        stats.bytes += file.size();

        if file.metadata.is_none() {
            stats.missing_metadata += 1;
            let err = EtfsError::MissingMetadata { file_id: file.file_id };
            tracing::warn!("{}; labelled {}", err, file.label);
        }
        if file.deleted {
            stats.deleted_files += 1;
        }
        if file.size_status == SizeStatus::Untruncated {
            stats.untruncated_files += 1;
            tracing::warn!(
                "fid {} has no declared size; final cluster kept whole",
                file.file_id
            );
        }
        if !file.is_complete() {
            stats.files_with_gaps += 1;
            tracing::warn!(
                "fid {} is missing {} of {} clusters: {:?}",
                file.file_id,
                file.missing_clusters.len(),
                file.cluster_count + file.missing_clusters.len(),
                file.missing_clusters
            );
        }
    }

    tracing::info!(
        "Materialized {} files ({} deleted, {} without metadata), {} bytes",
        stats.files,
        stats.deleted_files,
        stats.missing_metadata,
        stats.bytes
    );
    (recovered, stats)
}
