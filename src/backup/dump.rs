// ABOUTME: Drives the external dump tool once per table partition
// ABOUTME: Full dump for small tables, schema-only dump for the rest

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use super::classify::ClassificationResult;
use super::intermediate::{IntermediateFile, RunPrefix};
use crate::error::{BackupError, Result};

/// Options handed to the dump tool for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpOptions {
    pub include_tables: Vec<String>,
    pub add_drop_table: bool,
    pub no_data: bool,
    pub single_transaction: bool,
}

impl DumpOptions {
    /// Schema and rows.
    pub fn full(tables: &[String], single_transaction: bool) -> Self {
        Self {
            include_tables: tables.to_vec(),
            add_drop_table: true,
            no_data: false,
            single_transaction,
        }
    }

    /// Table definitions only.
    pub fn schema_only(tables: &[String], single_transaction: bool) -> Self {
        Self {
            include_tables: tables.to_vec(),
            add_drop_table: true,
            no_data: true,
            single_transaction,
        }
    }
}

/// Something that can write a SQL dump of the configured database to a file.
pub trait DumpRunner {
    fn start(
        &self,
        output: &Path,
        options: &DumpOptions,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Intermediates produced by one run, in merge order.
#[derive(Debug, Default)]
pub struct DumpArtifacts {
    pub full: Option<IntermediateFile>,
    pub empty: Option<IntermediateFile>,
}

impl DumpArtifacts {
    pub fn into_ordered(self) -> Vec<IntermediateFile> {
        self.full.into_iter().chain(self.empty).collect()
    }
}

/// Runs the two dump phases of a backup.
pub struct DumpOrchestrator<'a, R> {
    runner: &'a R,
    work_dir: PathBuf,
    prefix: RunPrefix,
    timeout: Option<Duration>,
}

impl<'a, R> DumpOrchestrator<'a, R>
where
    R: DumpRunner + Sync,
{
    pub fn new(runner: &'a R, work_dir: impl Into<PathBuf>, prefix: RunPrefix) -> Self {
        Self {
            runner,
            work_dir: work_dir.into(),
            prefix,
            timeout: None,
        }
    }

    /// Bound the combined duration of both dump invocations.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn prefix(&self) -> &RunPrefix {
        &self.prefix
    }

    /// Dump both partitions, skipping any partition without tables.
    ///
    /// If either invocation fails or the deadline passes, every intermediate
    /// created so far is deleted before the error is returned.
    pub async fn dump(
        &self,
        partition: &ClassificationResult,
        single_transaction: bool,
    ) -> Result<DumpArtifacts> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut artifacts = DumpArtifacts::default();

        if partition.full_tables.is_empty() {
            tracing::info!("No tables to dump with data, skipping full dump");
        } else {
            tracing::info!(
                "Dumping {} table(s) with data...",
                partition.full_tables.len()
            );
            let options = DumpOptions::full(&partition.full_tables, single_transaction);
            artifacts.full = Some(self.run_phase("full", &options, deadline).await?);
            tracing::info!("✓ Full dump complete");
        }

        if partition.empty_tables.is_empty() {
            tracing::info!("No oversized tables, skipping schema-only dump");
        } else {
            tracing::info!(
                "Dumping schema only for {} table(s)...",
                partition.empty_tables.len()
            );
            let options = DumpOptions::schema_only(&partition.empty_tables, single_transaction);
            // On failure `artifacts` drops here and takes the full dump with it.
            artifacts.empty = Some(self.run_phase("empty", &options, deadline).await?);
            tracing::info!("✓ Schema-only dump complete");
        }

        Ok(artifacts)
    }

    async fn run_phase(
        &self,
        label: &'static str,
        options: &DumpOptions,
        deadline: Option<Instant>,
    ) -> Result<IntermediateFile> {
        let file = IntermediateFile::create(&self.work_dir, &self.prefix, label)?;
        tracing::debug!("Writing {} dump to {}", label, file.path().display());

        let invocation = self.runner.start(file.path(), options);
        match (deadline, self.timeout) {
            (Some(deadline), Some(timeout)) => tokio::time::timeout_at(deadline, invocation)
                .await
                .map_err(|_| BackupError::TimedOut(timeout))??,
            _ => invocation.await?,
        }

        Ok(file)
    }
}
