// ABOUTME: Run configuration resolved from defaults, a TOML file, and CLI flags
// ABOUTME: Validates required parameters before anything touches the database

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::ClassificationPolicy;
use crate::error::{BackupError, Result};
use crate::mysql::Password;

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_MAX_SIZE_MB: f64 = 512.0;

/// One source of settings. Unset fields defer to the layer below.
///
/// The TOML file deserializes into this directly; `main` fills one from the
/// command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub username: Option<String>,
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_size_mb: Option<f64>,
    pub output: Option<PathBuf>,
    pub force_include: Vec<String>,
    pub always_empty: Option<String>,
    pub password: Option<String>,
    pub add_drop_database: Option<bool>,
    pub ssh: Option<String>,
    pub tmp_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub checksum: Option<bool>,
}

impl ConfigLayer {
    /// Fields set in `over` win; force-include lists are combined.
    pub fn overlay(self, over: ConfigLayer) -> ConfigLayer {
        let mut force_include = self.force_include;
        for name in over.force_include {
            if !force_include.contains(&name) {
                force_include.push(name);
            }
        }

        ConfigLayer {
            username: over.username.or(self.username),
            database: over.database.or(self.database),
            host: over.host.or(self.host),
            port: over.port.or(self.port),
            max_size_mb: over.max_size_mb.or(self.max_size_mb),
            output: over.output.or(self.output),
            force_include,
            always_empty: over.always_empty.or(self.always_empty),
            password: over.password.or(self.password),
            add_drop_database: over.add_drop_database.or(self.add_drop_database),
            ssh: over.ssh.or(self.ssh),
            tmp_dir: over.tmp_dir.or(self.tmp_dir),
            timeout_secs: over.timeout_secs.or(self.timeout_secs),
            checksum: over.checksum.or(self.checksum),
        }
    }
}

/// Load a TOML settings file
///
/// # Examples
///
/// ```no_run
/// # use mysql_large_dump::config::load_config_file;
/// # use std::path::Path;
/// let layer = load_config_file(Path::new("backup.toml")).unwrap();
/// ```
pub fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        BackupError::Config(format!("Cannot read config file '{}': {}", path.display(), e))
    })?;
    toml::from_str(&raw).map_err(|e| {
        BackupError::Config(format!("Invalid config file '{}': {}", path.display(), e))
    })
}

/// Fully resolved settings of one run.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub username: String,
    pub database: String,
    pub host: String,
    pub port: u16,
    pub max_size_mb: f64,
    pub output: PathBuf,
    pub force_include: Vec<String>,
    pub always_empty: Option<String>,
    /// `None` means prompt on the terminal.
    pub password: Option<Password>,
    pub add_drop_database: bool,
    pub ssh: Option<String>,
    pub tmp_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub checksum: bool,
}

impl DumpConfig {
    /// Apply `layer` over the built-in defaults and validate the result.
    ///
    /// `today` names the default output file.
    pub fn resolve(layer: ConfigLayer, today: NaiveDate) -> Result<Self> {
        let username = required(layer.username, "username")?;
        let database = required(layer.database, "database")?;
        let host = required(layer.host, "host")?;

        let max_size_mb = layer.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB);
        if !max_size_mb.is_finite() || max_size_mb < 0.0 {
            return Err(BackupError::Config(format!(
                "Max table size must be a non-negative number of MB, got {}.",
                max_size_mb
            )));
        }

        if let Some(predicate) = &layer.always_empty {
            if predicate.trim().is_empty() {
                return Err(BackupError::Config(
                    "Always-empty predicate cannot be blank.".to_string(),
                ));
            }
        }

        let timeout = match layer.timeout_secs {
            Some(0) => {
                return Err(BackupError::Config(
                    "Timeout must be at least 1 second.".to_string(),
                ))
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let output = layer
            .output
            .unwrap_or_else(|| default_output(&database, today));

        Ok(Self {
            username,
            host,
            port: layer.port.unwrap_or(DEFAULT_PORT),
            max_size_mb,
            output,
            force_include: layer.force_include,
            always_empty: layer.always_empty,
            password: layer.password.map(Password::new),
            add_drop_database: layer.add_drop_database.unwrap_or(false),
            ssh: layer.ssh,
            tmp_dir: layer.tmp_dir.unwrap_or_else(std::env::temp_dir),
            timeout,
            checksum: layer.checksum.unwrap_or(false),
            database,
        })
    }

    pub fn policy(&self) -> ClassificationPolicy {
        ClassificationPolicy {
            max_size_mb: self.max_size_mb,
            force_include: self.force_include.iter().cloned().collect(),
            always_empty_predicate: self.always_empty.clone(),
        }
    }
}

/// `<database>.<YYYYMMDD>.sql.gz`
pub fn default_output(database: &str, today: NaiveDate) -> PathBuf {
    PathBuf::from(format!("{}.{}.sql.gz", database, today.format("%Y%m%d")))
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(BackupError::Config(format!(
            "Missing required parameter {}.",
            name
        ))),
    }
}
