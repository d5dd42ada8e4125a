// ABOUTME: Wrapper for the mysqldump client used for both dump phases
// ABOUTME: Passes credentials through a private option file, not argv

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::connection::Credentials;
use crate::backup::dump::{DumpOptions, DumpRunner};
use crate::error::{BackupError, Result};
use crate::utils::OptionFile;

/// mysqldump error codes that mean the server was never reached.
const CONNECT_FAILURES: &[&str] = &["1045", "1044", "1049", "2002", "2003", "2005", "2013"];

/// Runs `mysqldump` against one database.
#[derive(Debug, Clone)]
pub struct Mysqldump {
    credentials: Credentials,
    program: String,
}

impl Mysqldump {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            program: "mysqldump".to_string(),
        }
    }

    /// Use another binary, e.g. `mariadb-dump`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments after `--defaults-extra-file`, which must come first.
    pub fn arguments(&self, output: &Path, options: &DumpOptions) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.credentials.host),
            format!("--port={}", self.credentials.port),
            format!("--result-file={}", output.display()),
        ];

        if options.add_drop_table {
            args.push("--add-drop-table".to_string());
        }
        if options.no_data {
            args.push("--no-data".to_string());
        }
        if options.single_transaction {
            args.push("--single-transaction".to_string());
        }

        args.push(self.credentials.database.clone());
        args.extend(options.include_tables.iter().cloned());
        args
    }
}

impl DumpRunner for Mysqldump {
    async fn start(&self, output: &Path, options: &DumpOptions) -> Result<()> {
        tracing::debug!(
            "Running {} for {} table(s) into {}",
            self.program,
            options.include_tables.len(),
            output.display()
        );

        check_positional_names(&self.credentials.database, &options.include_tables)?;

        // Held until the child exits; removed on drop.
        let option_file = OptionFile::new(&self.credentials.username, &self.credentials.password)?;

        let result = Command::new(&self.program)
            .arg(format!("--defaults-extra-file={}", option_file.path().display()))
            .args(self.arguments(output, options))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BackupError::Dump(format!(
                    "Failed to execute {}. Is the MySQL client installed?\n\
                     Error: {}",
                    self.program, e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(describe_failure(&self.program, result.status.code(), stderr.trim()));
        }

        Ok(())
    }
}

/// mysqldump takes the database and table names as positional arguments, so
/// a name starting with `-` would be parsed as an option.
fn check_positional_names(database: &str, tables: &[String]) -> Result<()> {
    let offending: Vec<&str> = std::iter::once(database)
        .chain(tables.iter().map(String::as_str))
        .filter(|name| name.starts_with('-'))
        .collect();

    if offending.is_empty() {
        return Ok(());
    }
    Err(BackupError::Dump(format!(
        "Cannot pass {} to mysqldump: names starting with '-' would be read as options",
        offending
            .iter()
            .map(|name| super::schema::quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

fn describe_failure(program: &str, code: Option<i32>, stderr: &str) -> BackupError {
    let exit = code.map_or_else(|| "signal".to_string(), |c| c.to_string());

    if CONNECT_FAILURES
        .iter()
        .any(|code| stderr.contains(&format!("Got error: {}", code)))
    {
        BackupError::Dump(format!(
            "{} could not connect to the server (exit {}): {}",
            program, exit, stderr
        ))
    } else {
        BackupError::Dump(format!("{} failed (exit {}): {}", program, exit, stderr))
    }
}
