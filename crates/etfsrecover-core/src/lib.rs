use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub mod error;
pub mod fs;
pub mod recovery;

pub use error::EtfsError;

// Re-export key recovery types
pub use fs::etfs::{FileTable, TransactionRecord, CLUSTER_SIZE, DATA_SIZE, TRANS_SIZE};
pub use recovery::{
    FileMetadata, MetadataLookup, NoMetadata, RecoveredFile, RecoveryConfig, RecoveryEngine,
    RecoveryProgress, RecoveryResult, RecoveryStage, RecoveryStatistics, SizeStatus,
};

/// Sub-directory that receives files the file table marks deleted
pub const DELETED_DIR: &str = "deleted";

/// Run the full recovery pipeline over an image on disk
pub fn recover_image(
    image_path: &Path,
    metadata: &dyn MetadataLookup,
    config: RecoveryConfig,
    progress: Option<Box<dyn Fn(RecoveryProgress) + Send + Sync>>,
) -> Result<RecoveryResult> {
    tracing::info!("Starting recovery of {}", image_path.display());

    let device = fs::common::BlockDevice::open(image_path)
        .with_context(|| format!("opening image {}", image_path.display()))?;
    tracing::info!(
        "Image size {} bytes, {} cluster slots",
        device.size(),
        device.size() / CLUSTER_SIZE as u64
    );

    let mut engine = RecoveryEngine::new(device.cursor(), config);
    if let Some(callback) = progress {
        engine.set_progress_callback(callback);
    }

    let result = engine
        .execute_recovery(metadata)
        .with_context(|| format!("recovering {}", image_path.display()))?;
    Ok(result)
}

/// Write every recovered file below `output_dir`
pub fn write_recovered_files(result: &RecoveryResult, output_dir: &Path) -> Result<RecoveryReport> {
    create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let mut recovered_count = 0;
    let mut deleted_count = 0;
    let mut failed_count = 0;
    let mut total_bytes_recovered = 0u64;
    let mut recovery_details = Vec::with_capacity(result.files.len());

    tracing::info!(
        "Writing {} files to {}",
        result.files.len(),
        output_dir.display()
    );

    for file in &result.files {
        let recovered_path = generate_recovery_path(output_dir, file);
        let status = match write_single_file(file, &recovered_path) {
            Ok(()) => {
                recovered_count += 1;
                if file.deleted {
                    deleted_count += 1;
                }
                total_bytes_recovered += file.size();
                tracing::info!(
                    "Recovered fid {} [{}] {} ({} bytes)",
                    file.file_id,
                    file.status(),
                    file.label,
                    file.size()
                );
                RecoveryStatus::Success
            }
            Err(e) => {
                failed_count += 1;
                tracing::warn!("Failed to write fid {}: {}", file.file_id, e);
                RecoveryStatus::Failed(e.to_string())
            }
        };

        recovery_details.push(FileRecoveryResult {
            file_id: file.file_id,
            label: file.label.clone(),
            recovered_path,
            size: file.size(),
            declared_size: file.metadata.as_ref().and_then(|m| m.declared_size),
            deleted: file.deleted,
            complete: file.is_complete(),
            missing_clusters: file.missing_clusters.clone(),
            size_status: file.size_status,
            sha256: matches!(status, RecoveryStatus::Success).then(|| hash_hex(&file.data)),
            status,
        });
    }

    let report = RecoveryReport {
        run_id: result.run_id,
        created_at: Utc::now(),
        total_files: result.files.len(),
        recovered_files: recovered_count,
        deleted_files: deleted_count,
        failed_files: failed_count,
        total_bytes_recovered,
        output_directory: output_dir.to_path_buf(),
        statistics: result.statistics.clone(),
        recovery_details,
    };

    tracing::info!(
        "Write complete: {}/{} files ({} deleted), {} bytes total",
        recovered_count,
        result.files.len(),
        deleted_count,
        total_bytes_recovered
    );

    Ok(report)
}

fn write_single_file(file: &RecoveredFile, path: &Path) -> std::result::Result<(), EtfsError> {
    let output = |source: std::io::Error| EtfsError::Output {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(output)?;
    }
    let mut out = File::create(path).map_err(output)?;
    out.write_all(&file.data).map_err(output)?;
    out.flush().map_err(output)?;
    Ok(())
}

fn hash_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Generate the output path for a recovered file
pub fn generate_recovery_path(output_dir: &Path, file: &RecoveredFile) -> PathBuf {
    let filename = match file.metadata.as_ref().map(|m| sanitize_filename(&m.filename)) {
        Some(name) if !name.is_empty() => format!("{:04}_{}", file.file_id, name),
        _ => {
            let extension = file.extension.as_deref().unwrap_or("bin");
            format!("fid_{:04}.{}", file.file_id, extension)
        }
    };

    if file.deleted {
        output_dir.join(DELETED_DIR).join(filename)
    } else {
        output_dir.join(filename)
    }
}

/// Keep a filename to a portable character set
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    sanitized.trim().trim_start_matches('.').to_string()
}

/// Recovery report with detailed results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub total_files: usize,
    pub recovered_files: usize,
    /// Recovered files the file table marks deleted
    pub deleted_files: usize,
    pub failed_files: usize,
    pub total_bytes_recovered: u64,
    pub output_directory: PathBuf,
    pub statistics: RecoveryStatistics,
    pub recovery_details: Vec<FileRecoveryResult>,
}

impl RecoveryReport {
    /// Save the report as pretty-printed JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
        Ok(())
    }
}

/// Individual file recovery result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecoveryResult {
    pub file_id: u32,
    pub label: String,
    pub recovered_path: PathBuf,
    pub size: u64,
    pub declared_size: Option<u64>,
    pub deleted: bool,
    pub complete: bool,
    pub missing_clusters: Vec<u32>,
    pub size_status: SizeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub status: RecoveryStatus,
}

/// Recovery status for individual files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Success,
    Failed(String),
}
