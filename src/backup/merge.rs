// ABOUTME: Streams the preamble and dump files into the final artifact
// ABOUTME: Bounded-memory chunked copy that always removes intermediates

use indicatif::ProgressBar;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::intermediate::IntermediateFile;
use super::sink::{OutputSink, SinkSummary};
use crate::error::{BackupError, Result};

/// Copy buffer size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Totals of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Uncompressed bytes written: preamble plus every intermediate.
    pub bytes_in: u64,
    pub files_merged: usize,
    pub sink: SinkSummary,
}

/// Concatenates intermediates into the output sink.
pub struct Merger {
    chunk_size: usize,
    progress: ProgressBar,
    cancel: Arc<AtomicBool>,
}

impl Default for Merger {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            progress: ProgressBar::hidden(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Report copied bytes on `progress`; its length is set by the merge.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Stop with [`BackupError::Cancelled`] once `cancel` is set. Checked
    /// before every chunk.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }

    /// Write `preamble` then every file of `files`, in order, to `output`.
    ///
    /// Each intermediate is deleted right after it has been copied, whether
    /// or not the copy succeeded. On an early error the files not yet reached
    /// are dropped, which deletes them too. A partially written output is left
    /// in place.
    pub fn run(
        &self,
        preamble: Option<&str>,
        files: Vec<IntermediateFile>,
        output: &Path,
    ) -> Result<MergeSummary> {
        let total: u64 = preamble.map_or(0, |p| p.len() as u64)
            + files.iter().map(IntermediateFile::len).sum::<u64>();
        self.progress.set_length(total);

        let mut sink = OutputSink::create(output)
            .map_err(|e| BackupError::io("Failed to open output file", output, e))?;
        tracing::debug!(
            "Writing {} output to {}",
            if sink.is_compressed() { "gzip" } else { "plain" },
            output.display()
        );

        self.check_cancelled()?;

        let mut bytes_in = 0u64;
        if let Some(preamble) = preamble {
            sink.write_chunk(preamble.as_bytes())
                .map_err(|e| BackupError::io("Failed to write preamble to", output, e))?;
            bytes_in += preamble.len() as u64;
            self.progress.inc(preamble.len() as u64);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut files_merged = 0;
        for file in files {
            let copied = self.copy_into(&file, &mut sink, &mut buf, output);

            let path = file.path().to_path_buf();
            match file.remove() {
                Err(e) if e.kind() != ErrorKind::NotFound => tracing::warn!(
                    "⚠ Failed to delete intermediate file {}: {}",
                    path.display(),
                    e
                ),
                _ => {}
            }

            bytes_in += copied?;
            files_merged += 1;
        }

        let sink = sink
            .finish()
            .map_err(|e| BackupError::io("Failed to finalize output file", output, e))?;
        self.progress.finish_and_clear();

        Ok(MergeSummary {
            bytes_in,
            files_merged,
            sink,
        })
    }

    fn copy_into(
        &self,
        file: &IntermediateFile,
        sink: &mut OutputSink,
        buf: &mut [u8],
        output: &Path,
    ) -> Result<u64> {
        tracing::debug!("Merging {} dump {}", file.label(), file.path().display());

        let mut reader = File::open(file.path())
            .map_err(|e| BackupError::io("Failed to open dump file", file.path(), e))?;

        let mut copied = 0u64;
        loop {
            self.check_cancelled()?;
            let n = match reader.read(buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BackupError::io("Failed to read dump file", file.path(), e)),
            };

            sink.write_chunk(&buf[..n])
                .map_err(|e| BackupError::io("Failed to write output file", output, e))?;
            copied += n as u64;
            self.progress.inc(n as u64);
        }

        Ok(copied)
    }
}

/// Merge with the default chunk size and no progress display.
pub fn merge(
    preamble: Option<&str>,
    files: Vec<IntermediateFile>,
    output: &Path,
) -> Result<MergeSummary> {
    Merger::new().run(preamble, files, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::intermediate::RunPrefix;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::{tempdir, TempDir};

    fn intermediate(dir: &TempDir, label: &'static str, content: &[u8]) -> IntermediateFile {
        let file = IntermediateFile::create(dir.path(), &RunPrefix::generate(), label).unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    fn leftover_sql_files(dir: &TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("largedbdump-"))
            .collect()
    }

    fn gunzip(path: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_merge_concatenates_in_order() {
        let work = tempdir().unwrap();
        let full = intermediate(&work, "full", b"-- full\nINSERT INTO a VALUES (1);\n");
        let empty = intermediate(&work, "empty", b"-- empty\nCREATE TABLE b (id INT);\n");
        let output = work.path().join("out.sql");

        let summary = merge(Some("USE `shop`;\n"), vec![full, empty], &output).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(
            content,
            "USE `shop`;\n-- full\nINSERT INTO a VALUES (1);\n-- empty\nCREATE TABLE b (id INT);\n"
        );
        assert_eq!(summary.bytes_in, content.len() as u64);
        assert_eq!(summary.files_merged, 2);
        assert!(leftover_sql_files(&work).is_empty());
    }

    #[test]
    fn test_merge_round_trips_for_any_chunk_size() {
        let work = tempdir().unwrap();
        let first: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let second: Vec<u8> = (0..3333u32).map(|i| (i * 7 % 253) as u8).collect();
        let preamble = "/*!40000 DROP DATABASE IF EXISTS `shop`*/;\n";

        let mut expected = preamble.as_bytes().to_vec();
        expected.extend_from_slice(&first);
        expected.extend_from_slice(&second);

        for chunk_size in [1, 7, 4096, 5000, first.len() + second.len()] {
            let output = work.path().join(format!("out-{}.sql.gz", chunk_size));
            let files = vec![
                intermediate(&work, "full", &first),
                intermediate(&work, "empty", &second),
            ];

            let summary = Merger::new()
                .with_chunk_size(chunk_size)
                .run(Some(preamble), files, &output)
                .unwrap();

            assert_eq!(gunzip(&output), expected, "chunk size {}", chunk_size);
            assert_eq!(summary.bytes_in, expected.len() as u64);
            assert!(summary.sink.compressed);
        }
        assert!(leftover_sql_files(&work).is_empty());
    }

    #[test]
    fn test_merge_without_preamble_or_files() {
        let work = tempdir().unwrap();
        let output = work.path().join("out.sql");
        let summary = merge(None, Vec::new(), &output).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"");
        assert_eq!(summary.bytes_in, 0);
        assert_eq!(summary.files_merged, 0);
    }

    #[test]
    fn test_merge_open_failure_still_deletes_intermediates() {
        let work = tempdir().unwrap();
        let files = vec![
            intermediate(&work, "full", b"data"),
            intermediate(&work, "empty", b"schema"),
        ];
        let output = work.path().join("missing-dir").join("out.sql.gz");

        let err = merge(None, files, &output).unwrap_err();
        assert!(matches!(err, BackupError::Io { .. }));
        assert!(err.to_string().contains("Failed to open output file"));
        assert!(leftover_sql_files(&work).is_empty());
    }

    #[test]
    fn test_merge_read_failure_deletes_every_intermediate() {
        let work = tempdir().unwrap();
        let broken = intermediate(&work, "full", b"");
        // Replace the file with a directory so reading it fails.
        std::fs::remove_file(broken.path()).unwrap();
        std::fs::create_dir(broken.path()).unwrap();
        let later = intermediate(&work, "empty", b"CREATE TABLE b (id INT);\n");
        let later_path = later.path().to_path_buf();
        let output = work.path().join("out.sql");

        let err = merge(None, vec![broken, later], &output).unwrap_err();

        assert!(matches!(err, BackupError::Io { .. }));
        assert!(!later_path.exists());
        // The partial output is not removed by the merger.
        assert!(output.exists());
    }

    #[test]
    fn test_cancelled_merge_stops_and_deletes_intermediates() {
        let work = tempdir().unwrap();
        let files = vec![
            intermediate(&work, "full", b"INSERT INTO a VALUES (1);\n"),
            intermediate(&work, "empty", b"CREATE TABLE b (id INT);\n"),
        ];
        let output = work.path().join("out.sql");
        let cancel = Arc::new(AtomicBool::new(true));

        let err = Merger::new()
            .with_cancel(cancel)
            .run(None, files, &output)
            .unwrap_err();

        assert!(matches!(err, BackupError::Cancelled));
        assert!(leftover_sql_files(&work).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_merge_into_full_disk_is_an_io_error() {
        let work = tempdir().unwrap();
        // Larger than the sink's buffer so the write reaches the device.
        let files = vec![
            intermediate(&work, "full", &vec![b'x'; 64 * 1024]),
            intermediate(&work, "empty", b"CREATE TABLE b (id INT);\n"),
        ];

        let err = merge(None, files, Path::new("/dev/full")).unwrap_err();

        assert!(matches!(err, BackupError::Io { .. }));
        assert!(err.to_string().contains("Failed to write output file"));
        assert!(leftover_sql_files(&work).is_empty());
    }
}
