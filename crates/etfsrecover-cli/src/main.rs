use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use etfsrecover_core::recovery::{order_for_replay, scan_transactions};
use etfsrecover_core::{
	recover_image, write_recovered_files, FileTable, MetadataLookup, RecoveryConfig,
	RecoveryProgress, SizeStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "etfsrecover", version, about = "etfsrecover - recover files from ETFS NAND dumps")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Show slot-level information about a NAND dump
	Info {
		/// Path to NAND dump
		image: PathBuf,
	},
	/// Scan a NAND dump for transaction records
	Scan {
		/// Path to NAND dump
		image: PathBuf,
		/// Print every transaction in replay order
		#[arg(long)]
		list: bool,
	},
	/// List the entries of a .filetable
	Filetable {
		/// Path to .filetable
		filetable: PathBuf,
	},
	/// Replay transactions and write recovered files
	Recover {
		/// Path to .filetable
		filetable: PathBuf,
		/// Path to NAND dump
		image: PathBuf,
		/// Output directory
		#[arg(long)]
		out: PathBuf,
		/// Only recover these file ids (repeatable)
		#[arg(long = "file-id")]
		file_ids: Vec<u32>,
		/// Drop files the file table marks deleted
		#[arg(long)]
		skip_deleted: bool,
		/// Write a JSON report to this path
		#[arg(long)]
		report: Option<PathBuf>,
		/// Materialize files on a single thread
		#[arg(long)]
		sequential: bool,
	},
	/// Write the data area of every used slot without transaction records
	Strip {
		/// Path to NAND dump
		image: PathBuf,
		/// Output file
		#[arg(long)]
		out: PathBuf,
	},
}

fn main() -> Result<()> {
	// Initialize tracing
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Info { image } => {
			let info = etfsrecover_core::fs::get_filesystem_info(&image)
				.with_context(|| format!("reading {}", image.display()))?;
			println!("📋 Image Information:");
			println!("{}", info);
		}
		Commands::Scan { image, list } => {
			let reader = BufReader::new(File::open(&image).with_context(|| format!("opening {}", image.display()))?);
			let (entries, stats) = scan_transactions(reader)?;
			let ordered = order_for_replay(entries);

			if list {
				for (i, entry) in ordered.iter().enumerate() {
					println!("# {:06} - Offset: {:08x} - {}", i, entry.physical_offset, entry.transaction);
				}
				println!();
			}

			println!("✅ Scan completed");
			println!("🧱 Slots Read: {}", stats.slots_read);
			println!("📈 Transactions: {}", stats.transactions);
			println!("   Valid: {}", stats.valid_transactions);
			println!("   Invalid: {}", stats.invalid_transactions);
			println!("🗑️  Unused Slots: {}", stats.unused_slots);
			if stats.trailing_bytes > 0 {
				println!("⚠️  Trailing Bytes Ignored: {}", stats.trailing_bytes);
			}
		}
		Commands::Filetable { filetable } => {
			let table = FileTable::from_path(&filetable)?;
			for (fid, entry) in table.entries().iter().enumerate() {
				let path = table.full_path(fid as u32).unwrap_or_default();
				println!("{:03}: {:3} - size:{:8} - {}", fid, entry.status(), entry.size, path);
			}
			println!();
			println!("📈 Entries: {} defined, {} deleted", table.defined_count(), table.deleted_count());
		}
		Commands::Recover { filetable, image, out, file_ids, skip_deleted, report, sequential } => {
			let table = FileTable::from_path(&filetable)?;
			let config = RecoveryConfig {
				file_filter: (!file_ids.is_empty()).then(|| file_ids.into_iter().collect::<BTreeSet<_>>()),
				include_deleted: !skip_deleted,
				parallel_materialize: !sequential,
			};

			let bar = ProgressBar::new(100);
			bar.set_style(ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")?);
			let progress_bar = bar.clone();
			let callback = move |progress: RecoveryProgress| {
				progress_bar.set_position(progress.progress_percent as u64);
				progress_bar.set_message(progress.current_operation);
			};

			let lookup: &dyn MetadataLookup = &table;
			let result = recover_image(&image, lookup, config, Some(Box::new(callback)))?;
			bar.finish_and_clear();

			let written = write_recovered_files(&result, &out)?;
			if let Some(report_path) = report {
				written.save_json(&report_path)?;
				println!("📝 Report: {}", report_path.display());
			}

			for file in &result.files {
				let mut notes = Vec::new();
				if !file.is_complete() {
					notes.push(format!("missing clusters {:?}", file.missing_clusters));
				}
				if file.size_status == SizeStatus::Untruncated {
					notes.push("no declared size".to_string());
				}
				println!(
					"{:04} [{:3}] {:10} bytes  {}{}",
					file.file_id,
					file.status(),
					file.size(),
					file.label,
					if notes.is_empty() { String::new() } else { format!("  ({})", notes.join(", ")) }
				);
			}

			let stats = &result.statistics;
			println!();
			println!("✅ Recovery completed!");
			println!("📊 Run ID: {}", result.run_id);
			println!("📈 Transactions: {} ({} valid, {} invalid)",
				stats.scan.transactions, stats.scan.valid_transactions, stats.scan.invalid_transactions);
			println!("🔄 Superseded Writes: {}", stats.replay.superseded_writes);
			println!("📁 Files Recovered: {}", written.recovered_files);
			println!("🗑️  Recovered Deleted Files: {}", written.deleted_files);
			println!("❓ Files Without Metadata: {}", stats.materialize.missing_metadata);
			if stats.skipped_deleted_files > 0 {
				println!("⏭️  Deleted Files Skipped: {}", stats.skipped_deleted_files);
			}
			if written.failed_files > 0 {
				println!("❌ Failed Writes: {}", written.failed_files);
			}
			println!("💾 Output: {}", out.display());
		}
		Commands::Strip { image, out } => {
			let reader = BufReader::new(File::open(&image).with_context(|| format!("opening {}", image.display()))?);
			let mut writer = BufWriter::new(File::create(&out).with_context(|| format!("creating {}", out.display()))?);
			let stats = etfsrecover_core::fs::etfs::strip_transaction_records(reader, &mut writer)?;
			writer.flush().with_context(|| format!("writing {}", out.display()))?;
			println!("✅ Stripped {} slots ({} skipped) -> {}", stats.slots_kept, stats.slots_skipped, out.display());
			println!("💾 Bytes Written: {}", stats.bytes_written);
		}
	}
	Ok(())
}
