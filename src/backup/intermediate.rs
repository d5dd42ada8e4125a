// ABOUTME: Transient dump files shared by the orchestrator and the merger
// ABOUTME: Each file is deleted when its owner drops it, on every exit path

use rand::Rng;
use std::fmt;
use std::path::Path;
use tempfile::TempPath;

use crate::error::{BackupError, Result};
use crate::utils::INTERMEDIATE_PREFIX;

/// Prefix shared by every intermediate file of one run.
///
/// Built from 64 random bits, so two runs started in the same second (or in
/// the same process) never collide. `tempfile` adds its own random component
/// per file on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPrefix(String);

impl RunPrefix {
    pub fn generate() -> Self {
        let token: u64 = rand::thread_rng().gen();
        Self(format!("{}{:016x}-", INTERMEDIATE_PREFIX, token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One dump output awaiting the merge.
///
/// Owned by the orchestrator until handed to the merger. Dropping it removes
/// the file, so a failed or cancelled run never leaks intermediates.
#[derive(Debug)]
pub struct IntermediateFile {
    label: &'static str,
    path: TempPath,
}

impl IntermediateFile {
    /// Reserve a fresh, uniquely named file in `dir`.
    pub fn create(dir: &Path, prefix: &RunPrefix, label: &'static str) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix(prefix.as_str())
            .suffix(&format!("-{}.sql", label))
            .tempfile_in(dir)
            .map_err(|e| BackupError::io("Failed to create intermediate file in", dir, e))?
            .into_temp_path();

        Ok(Self { label, path })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size on disk, or 0 if it cannot be read.
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the file now, reporting failures instead of swallowing them.
    pub fn remove(self) -> std::io::Result<()> {
        self.path.close()
    }
}
