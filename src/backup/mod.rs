// ABOUTME: Two-phase backup pipeline: classify, probe, dump, merge
// ABOUTME: Collaborators are traits so the pipeline runs against fakes in tests

pub mod classify;
pub mod dump;
pub mod intermediate;
pub mod merge;
pub mod sink;

pub use classify::{
    classify, classify_schema, ClassificationPolicy, ClassificationResult, MetadataSource,
    TableSizeInfo, NEVER_MATCHES,
};
pub use dump::{DumpArtifacts, DumpOptions, DumpOrchestrator, DumpRunner};
pub use intermediate::{IntermediateFile, RunPrefix};
pub use merge::{merge, MergeSummary, Merger, CHUNK_SIZE};
pub use sink::{is_compressed_path, OutputSink, SinkSummary};

use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BackupError, Result};
use crate::mysql::privileges::{has_consistent_snapshot_capability, GrantSource};
use crate::utils::format_bytes;

/// Everything a single run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub database: String,
    pub policy: ClassificationPolicy,
    /// Drop/create database statements written before any dump.
    pub preamble: Option<String>,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub timeout: Option<Duration>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub classification: ClassificationResult,
    pub single_transaction: bool,
    pub prefix: RunPrefix,
    pub merge: MergeSummary,
}

/// Run the whole pipeline once.
///
/// Classification and the capability probe are independent; the orchestrator
/// uses both, and the merger consumes whatever the orchestrator produced.
pub async fn run_backup<M, G, R>(
    metadata: &M,
    grants: &G,
    runner: &R,
    plan: &BackupPlan,
    progress: ProgressBar,
) -> Result<BackupReport>
where
    M: MetadataSource + Sync,
    G: GrantSource + Sync,
    R: DumpRunner + Sync,
{
    let classification = classify_schema(metadata, &plan.database, &plan.policy).await?;
    tracing::info!(
        "  {} table(s) with data, {} table(s) schema-only",
        classification.full_tables.len(),
        classification.empty_tables.len()
    );
    tracing::info!(
        "  Total uncompressed dump size is roughly {}",
        format_bytes(classification.total_full_size_bytes())
    );
    if classification.is_empty() {
        tracing::warn!("⚠ No tables found in '{}'", plan.database);
    }

    let single_transaction = has_consistent_snapshot_capability(grants).await;
    if single_transaction {
        tracing::info!("✓ Using a consistent snapshot (--single-transaction)");
    } else {
        tracing::warn!("⚠ Account lacks SUPER, dumping without a consistent snapshot");
    }

    let prefix = RunPrefix::generate();
    tracing::info!(
        "  Temp file prefix is {}",
        plan.work_dir.join(prefix.as_str()).display()
    );

    let orchestrator = DumpOrchestrator::new(runner, &plan.work_dir, prefix.clone())
        .with_timeout(plan.timeout);
    let artifacts = orchestrator.dump(&classification, single_transaction).await?;

    tracing::info!("Merging dumps into {}...", plan.output.display());
    let files = artifacts.into_ordered();
    let mut guard = MergeGuard::new(&files);
    let preamble = plan.preamble.clone();
    let output = plan.output.clone();
    let merger = Merger::new()
        .with_progress(progress)
        .with_cancel(guard.cancel.clone());
    let merge = tokio::task::spawn_blocking(move || merger.run(preamble.as_deref(), files, &output))
        .await;
    guard.disarm();
    let merge = merge
        .map_err(|e| BackupError::io("Merge task failed for", &plan.output, std::io::Error::other(e)))??;
    tracing::info!(
        "✓ Merged {} file(s), {} in, {} on disk",
        merge.files_merged,
        format_bytes(merge.bytes_in),
        format_bytes(merge.sink.bytes_written)
    );

    Ok(BackupReport {
        classification,
        single_transaction,
        prefix,
        merge,
    })
}

/// Covers the blocking merge while its future is awaited.
///
/// A blocking task cannot be aborted, so if the run is dropped (Ctrl-C, an
/// outer timeout) the merge thread would keep the intermediates alive past
/// process exit. Dropping an armed guard stops the merger at its next chunk
/// and deletes the files itself.
struct MergeGuard {
    cancel: Arc<AtomicBool>,
    paths: Vec<PathBuf>,
    armed: bool,
}

impl MergeGuard {
    fn new(files: &[IntermediateFile]) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            paths: files.iter().map(|f| f.path().to_path_buf()).collect(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed intermediate {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "⚠ Failed to delete intermediate file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }
}
