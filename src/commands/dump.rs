// ABOUTME: Dump command implementation - back up one database to a single file
// ABOUTME: Wires the backup pipeline to MySQL, mysqldump, and the terminal

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::backup::{run_backup, BackupPlan, BackupReport};
use crate::config::DumpConfig;
use crate::error::BackupError;
use crate::interactive::prompt_password;
use crate::mysql::{self, Credentials, Mysqldump};
use crate::tunnel::SshTunnel;
use crate::utils::{check_required_tools, sanitize_identifier};

/// Back up the configured database
///
/// Performs a complete run:
/// 1. Checks that `mysqldump` (and `ssh` for a tunnel) are installed
/// 2. Prompts for the password if none was configured
/// 3. Opens the SSH tunnel, if any, and connects for metadata queries
/// 4. Classifies tables, dumps them in two phases, and merges the dumps
/// 5. Writes the `.sha256` sidecar when checksums are enabled
///
/// Ctrl-C stops the run; intermediates are removed on the way out.
///
/// # Errors
///
/// Fails on missing tools, connection problems, dump tool failures, output
/// I/O errors, timeout, or cancellation. Configuration problems keep their
/// [`BackupError::Config`] type so the caller can print usage.
///
/// # Examples
///
/// ```no_run
/// # use mysql_large_dump::commands::dump;
/// # use mysql_large_dump::config::{ConfigLayer, DumpConfig};
/// # async fn example() -> anyhow::Result<()> {
/// let layer = ConfigLayer {
///     username: Some("backup".into()),
///     database: Some("shop".into()),
///     host: Some("db.internal".into()),
///     ..Default::default()
/// };
/// let config = DumpConfig::resolve(layer, chrono::Local::now().date_naive())?;
/// dump(&config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn dump(config: &DumpConfig) -> Result<()> {
    check_required_tools(config.ssh.is_some())?;

    let password = match &config.password {
        Some(password) => password.clone(),
        None => prompt_password(&config.username)?,
    };

    tracing::info!(
        "Dumping database {} on {} with a max table size of {} MB.",
        sanitize_identifier(&config.database),
        config.host,
        config.max_size_mb
    );
    if !config.force_include.is_empty() {
        tracing::info!(
            "  Always including data for: {}",
            config
                .force_include
                .iter()
                .map(|t| sanitize_identifier(t))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if let Some(predicate) = &config.always_empty {
        tracing::info!("  Schema only where: {}", predicate);
    }

    let tunnel = match &config.ssh {
        Some(target) => Some(SshTunnel::open(target, &config.host, config.port).await?),
        None => None,
    };
    let credentials = match &tunnel {
        Some(tunnel) => Credentials {
            host: "127.0.0.1".to_string(),
            port: tunnel.local_port(),
            username: config.username.clone(),
            password,
            database: config.database.clone(),
        },
        None => Credentials {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password,
            database: config.database.clone(),
        },
    };

    let result = run_with_connection(config, credentials).await;

    if let Some(tunnel) = tunnel {
        tunnel.close().await;
    }

    let report = result?;
    tracing::info!("  SHA-256 {}", report.merge.sink.sha256);

    if config.checksum {
        let sidecar = write_checksum_file(&config.output, &report.merge.sink.sha256)?;
        tracing::info!("✓ Checksum written to {}", sidecar.display());
    }

    println!("Success!  Output written to {}.", config.output.display());
    Ok(())
}

async fn run_with_connection(config: &DumpConfig, credentials: Credentials) -> Result<BackupReport> {
    tracing::info!("Connecting to {}:{}...", credentials.host, credentials.port);
    let pool = mysql::connect(&credentials).await?;
    tracing::info!("✓ Connected");

    let preamble = if config.add_drop_database {
        Some(
            mysql::database_preamble(&pool, &config.database)
                .await
                .context("Failed to build DROP/CREATE DATABASE preamble")?,
        )
    } else {
        None
    };

    let plan = BackupPlan {
        database: config.database.clone(),
        policy: config.policy(),
        preamble,
        output: config.output.clone(),
        work_dir: config.tmp_dir.clone(),
        timeout: config.timeout,
    };
    let runner = Mysqldump::new(credentials);
    let progress = merge_progress_bar();

    let result = tokio::select! {
        result = run_backup(&pool, &pool, &runner, &plan, progress.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("⚠ Interrupted, cleaning up...");
            Err(BackupError::Cancelled)
        }
    };
    progress.finish_and_clear();
    pool.close().await;

    Ok(result?)
}

fn merge_progress_bar() -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    progress.set_message("merging");
    progress
}

/// Write `<output>.sha256` in `sha256sum` format and return its path.
pub fn write_checksum_file(output: &Path, sha256: &str) -> Result<PathBuf> {
    let mut sidecar = output.as_os_str().to_owned();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);

    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| output.display().to_string());

    std::fs::write(&sidecar, format!("{}  {}\n", sha256, file_name))
        .with_context(|| format!("Failed to write checksum file {}", sidecar.display()))?;
    Ok(sidecar)
}
