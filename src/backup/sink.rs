// ABOUTME: Output sink strategies for the final dump artifact
// ABOUTME: Plain or gzip writer chosen once from the output path suffix

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Output suffixes that select gzip compression (case-insensitive).
const GZIP_EXTENSIONS: &[&str] = &["gz", "gzip"];

/// Whether `path` asks for a compressed artifact.
pub fn is_compressed_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| GZIP_EXTENSIONS.iter().any(|g| ext.eq_ignore_ascii_case(g)))
        .unwrap_or(false)
}

/// Counts and hashes the bytes that actually reach the file.
pub struct DigestWriter {
    inner: BufWriter<File>,
    hasher: Sha256,
    written: u64,
}

impl DigestWriter {
    fn new(file: File) -> Self {
        Self {
            inner: BufWriter::new(file),
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn close(self, compressed: bool) -> io::Result<SinkSummary> {
        let file = self.inner.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(SinkSummary {
            compressed,
            bytes_written: self.written,
            sha256: format!("{:x}", self.hasher.finalize()),
        })
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    pub compressed: bool,
    pub bytes_written: u64,
    pub sha256: String,
}

/// Append-only destination of the merged dump.
pub enum OutputSink {
    Plain(DigestWriter),
    Gzip(GzEncoder<DigestWriter>),
}

impl OutputSink {
    /// Create (or truncate) `path`, compressing iff its suffix asks for it.
    pub fn create(path: &Path) -> io::Result<Self> {
        let writer = DigestWriter::new(File::create(path)?);

        Ok(if is_compressed_path(path) {
            OutputSink::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            OutputSink::Plain(writer)
        })
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, OutputSink::Gzip(_))
    }

    /// Write the whole chunk. A sink that accepts zero bytes is an error
    /// (`WriteZero`), never a silent end of output.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            OutputSink::Plain(w) => w.write_all(chunk),
            OutputSink::Gzip(w) => w.write_all(chunk),
        }
    }

    /// Flush compression trailers and buffers, then sync the file.
    pub fn finish(self) -> io::Result<SinkSummary> {
        match self {
            OutputSink::Plain(w) => w.close(false),
            OutputSink::Gzip(w) => w.finish()?.close(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_is_compressed_path() {
        assert!(is_compressed_path(&PathBuf::from("shop.20240101.sql.gz")));
        assert!(is_compressed_path(&PathBuf::from("/backups/shop.GZ")));
        assert!(is_compressed_path(&PathBuf::from("shop.sql.gzip")));
        assert!(!is_compressed_path(&PathBuf::from("shop.sql")));
        assert!(!is_compressed_path(&PathBuf::from("shop.gz.sql")));
        assert!(!is_compressed_path(&PathBuf::from("gz")));
    }

    #[test]
    fn test_plain_sink_writes_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.sql");

        let mut sink = OutputSink::create(&path).unwrap();
        assert!(!sink.is_compressed());
        sink.write_chunk(b"SELECT 1;\n").unwrap();
        sink.write_chunk(b"SELECT 2;\n").unwrap();
        let summary = sink.finish().unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(content, b"SELECT 1;\nSELECT 2;\n");
        assert_eq!(summary.bytes_written, content.len() as u64);
        assert_eq!(summary.sha256, format!("{:x}", Sha256::digest(&content)));
        assert!(!summary.compressed);
    }

    #[test]
    fn test_gzip_sink_compresses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.sql.gz");

        let mut sink = OutputSink::create(&path).unwrap();
        assert!(sink.is_compressed());
        let body = "INSERT INTO t VALUES (1);\n".repeat(1000);
        sink.write_chunk(body.as_bytes()).unwrap();
        let summary = sink.finish().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(summary.bytes_written, raw.len() as u64);
        assert_eq!(summary.sha256, format!("{:x}", Sha256::digest(&raw)));
        assert!(raw.len() < body.len());

        let mut decoded = String::new();
        GzDecoder::new(&raw[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, body);
    }
}
