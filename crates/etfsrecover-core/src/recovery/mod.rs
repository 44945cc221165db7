/// Transaction-log replay and file reconstruction
pub mod engine;
pub mod materialize;
pub mod metadata;
pub mod orderer;
pub mod replay;
pub mod scanner;

pub use engine::{
    RecoveryConfig, RecoveryEngine, RecoveryProgress, RecoveryResult, RecoveryStage,
    RecoveryStatistics,
};

pub use materialize::{
    last_cluster_len, materialize_all, materialize_file, MaterializeStatistics, RecoveredFile,
    SizeStatus,
};

pub use metadata::{FileMetadata, MetadataLookup, NoMetadata};
pub use orderer::order_for_replay;
pub use replay::{ClusterReplayer, FileReconstruction, ReplayState, ReplayStatistics};
pub use scanner::{scan_transactions, ScanStatistics, ScannedEntry, TransactionScanner};
