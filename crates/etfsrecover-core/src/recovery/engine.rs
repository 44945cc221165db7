/// ETFS recovery pipeline: scan, order, replay, materialize
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom};
use uuid::Uuid;

use super::materialize::{materialize_all, MaterializeStatistics, RecoveredFile};
use super::metadata::MetadataLookup;
use super::orderer::order_for_replay;
use super::replay::{ClusterReplayer, ReplayStatistics};
use super::scanner::{ScanStatistics, TransactionScanner};
use crate::error::{EtfsError, Result};

/// Recovery engine configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Only replay these file ids
    pub file_filter: Option<BTreeSet<u32>>,
    /// Keep files the file table marks deleted
    pub include_deleted: bool,
    /// Materialize files on the rayon pool
    pub parallel_materialize: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            file_filter: None,
            include_deleted: true,
            parallel_materialize: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Initialization,
    Scanning,
    Ordering,
    Replaying,
    Materializing,
    Complete,
}

#[derive(Debug, Clone)]
pub struct RecoveryProgress {
    pub stage: RecoveryStage,
    pub progress_percent: f32,
    pub files_found: u32,
    pub transactions_processed: u64,
    pub current_operation: String,
}

/// Summary counters for a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    pub scan: ScanStatistics,
    pub replay: ReplayStatistics,
    pub materialize: MaterializeStatistics,
    /// Deleted files dropped because `include_deleted` was off
    pub skipped_deleted_files: u64,
}

/// Output of a recovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub files: Vec<RecoveredFile>,
    pub statistics: RecoveryStatistics,
}

impl RecoveryResult {
    pub fn recovered_files(&self) -> impl Iterator<Item = &RecoveredFile> {
        self.files.iter().filter(|f| !f.deleted)
    }

    pub fn deleted_files(&self) -> impl Iterator<Item = &RecoveredFile> {
        self.files.iter().filter(|f| f.deleted)
    }
}

/// Number of replayed entries between progress reports
const PROGRESS_INTERVAL: usize = 1024;

/// ETFS recovery engine over a seekable image
pub struct RecoveryEngine<R> {
    config: RecoveryConfig,
    source: R,
    run_id: Uuid,
    progress_callback: Option<Box<dyn Fn(RecoveryProgress) + Send + Sync>>,
}

impl<R: Read + Seek> RecoveryEngine<R> {
    pub fn new(source: R, config: RecoveryConfig) -> Self {
        Self {
            config,
            source,
            run_id: Uuid::new_v4(),
            progress_callback: None,
        }
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(RecoveryProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute the full pipeline; any fatal error discards partial state
    pub fn execute_recovery(&mut self, metadata: &dyn MetadataLookup) -> Result<RecoveryResult> {
        self.emit_progress(RecoveryStage::Initialization, 0.0, 0, 0, "Initializing recovery engine...");
        tracing::info!("Recovery run {} starting", self.run_id);

        // Phase 1: collect transactions
        self.emit_progress(RecoveryStage::Scanning, 5.0, 0, 0, "Scanning transaction records...");
        self.source
            .seek(SeekFrom::Start(0))
            .map_err(|e| EtfsError::read(0, e))?;
        let (entries, scan_stats) = TransactionScanner::new(&mut self.source).collect_entries()?;

        // Phase 2: establish replay order
        self.emit_progress(
            RecoveryStage::Ordering,
            30.0,
            0,
            scan_stats.transactions,
            "Sorting transactions by sequence...",
        );
        let ordered = order_for_replay(entries);

        // Phase 3: replay clusters
        let (state, replay_stats) = {
            let callback = self.progress_callback.as_deref();
            let mut replayer = ClusterReplayer::new(&mut self.source)
                .with_file_filter(self.config.file_filter.clone());
            replayer.replay(&ordered, |done, total| {
                if done % PROGRESS_INTERVAL != 0 && done != total {
                    return;
                }
                if let Some(callback) = callback {
                    callback(RecoveryProgress {
                        stage: RecoveryStage::Replaying,
                        progress_percent: 35.0 + 50.0 * done as f32 / total.max(1) as f32,
                        files_found: 0,
                        transactions_processed: done as u64,
                        current_operation: format!("Replaying transaction {}/{}", done, total),
                    });
                }
            })?
        };

        // Phase 4: build byte streams
        self.emit_progress(
            RecoveryStage::Materializing,
            90.0,
            state.len() as u32,
            replay_stats.clusters_replayed,
            "Materializing files...",
        );
        let (mut files, materialize_stats) =
            materialize_all(&state, metadata, self.config.parallel_materialize);
        drop(state);

        let mut skipped_deleted_files = 0;
        if !self.config.include_deleted {
            let before = files.len();
            files.retain(|f| !f.deleted);
            skipped_deleted_files = (before - files.len()) as u64;
            tracing::info!("Skipped {} deleted files", skipped_deleted_files);
        }

        self.emit_progress(
            RecoveryStage::Complete,
            100.0,
            files.len() as u32,
            replay_stats.clusters_replayed,
            "Recovery complete",
        );
        tracing::info!(
            "Recovery run {} complete: {} files ({} deleted)",
            self.run_id,
            files.len(),
            files.iter().filter(|f| f.deleted).count()
        );

        Ok(RecoveryResult {
            run_id: self.run_id,
            created_at: Utc::now(),
            files,
            statistics: RecoveryStatistics {
                scan: scan_stats,
                replay: replay_stats,
                materialize: materialize_stats,
                skipped_deleted_files,
            },
        })
    }

    fn emit_progress(
        &self,
        stage: RecoveryStage,
        progress_percent: f32,
        files_found: u32,
        transactions_processed: u64,
        operation: &str,
    ) {
        if let Some(ref callback) = self.progress_callback {
            callback(RecoveryProgress {
                stage,
                progress_percent,
                files_found,
                transactions_processed,
                current_operation: operation.to_string(),
            });
        }
    }
}
