// ABOUTME: Utility functions for tool checks, credentials files, and cleanup
// ABOUTME: Shared helpers used by the dump command and the mysqldump wrapper

use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use which::which;

use crate::error::{BackupError, Result};
use crate::mysql::Password;

/// Prefix of every intermediate file this tool writes.
pub const INTERMEDIATE_PREFIX: &str = "largedbdump-";

/// Check that the external programs a run needs are on `PATH`
///
/// Always requires `mysqldump`; requires `ssh` when `needs_ssh` is set.
///
/// # Errors
///
/// Returns a `Config` error listing the missing tools with install hints.
///
/// # Examples
///
/// ```
/// # use mysql_large_dump::utils::check_required_tools;
/// // Only mysqldump is needed without a tunnel
/// let _ = check_required_tools(false);
/// ```
pub fn check_required_tools(needs_ssh: bool) -> Result<()> {
    let mut tools = vec!["mysqldump"];
    if needs_ssh {
        tools.push("ssh");
    }

    let missing: Vec<&str> = tools.into_iter().filter(|tool| which(tool).is_err()).collect();

    if !missing.is_empty() {
        return Err(BackupError::Config(format!(
            "Missing required client tools: {}\n\
             \n\
             Please install the MySQL client tools:\n\
             - Ubuntu/Debian: sudo apt-get install mysql-client (or mariadb-client)\n\
             - macOS: brew install mysql-client\n\
             - RHEL/CentOS: sudo yum install mysql",
            missing.join(", ")
        )));
    }

    Ok(())
}

/// Private MySQL option file carrying the login for a client program
///
/// Created with owner-only permissions in the system temp directory and
/// removed when dropped. Pass it as `--defaults-extra-file`, which must be
/// the first argument of the client.
pub struct OptionFile {
    file: NamedTempFile,
}

impl OptionFile {
    pub fn new(username: &str, password: &Password) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("largedbdump-login-")
            .suffix(".cnf")
            .tempfile()
            .map_err(|e| BackupError::io("Failed to create option file in", std::env::temp_dir(), e))?;

        let contents = format!(
            "[client]\nuser=\"{}\"\npassword=\"{}\"\n",
            escape_option_value(username),
            escape_option_value(password.expose())
        );
        file.write_all(contents.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| BackupError::io("Failed to write option file", file.path(), e))?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Escape a value for a double-quoted option file entry.
fn escape_option_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Remove intermediates left behind by runs that were killed outright
///
/// Only files in `dir` named with [`INTERMEDIATE_PREFIX`] and older than
/// `max_age` are touched, so concurrent runs keep their files. Returns how
/// many files were removed.
pub fn cleanup_stale_intermediates(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    // Entries can vanish under a concurrent run; skip them rather than abort.
    for entry in std::fs::read_dir(dir)?.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(INTERMEDIATE_PREFIX) {
            continue;
        }

        if is_stale(entry.metadata(), now, max_age) {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::debug!("Removed stale intermediate {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => tracing::warn!(
                    "⚠ Could not remove stale intermediate {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
    }

    Ok(removed)
}

/// A regular file last modified more than `max_age` before `now`. Entries
/// whose metadata cannot be read are never stale.
fn is_stale(metadata: std::io::Result<std::fs::Metadata>, now: SystemTime, max_age: Duration) -> bool {
    let Ok(metadata) = metadata else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    metadata
        .modified()
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age > max_age)
}

/// Format bytes into human-readable string
///
/// # Examples
///
/// ```
/// # use mysql_large_dump::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_idx])
}

/// Sanitize an identifier (table name, schema name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection.
/// This is for display only; never use it to build SQL.
///
/// # Examples
///
/// ```
/// # use mysql_large_dump::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}
