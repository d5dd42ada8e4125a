// ABOUTME: CLI entry point for mysql-large-dump
// ABOUTME: Parses flags, resolves configuration, and runs the dump command

use clap::{ArgAction, CommandFactory, Parser};
use mysql_large_dump::commands;
use mysql_large_dump::config::{load_config_file, ConfigLayer, DumpConfig};
use mysql_large_dump::error::BackupError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mysql-large-dump")]
#[command(
    about = "Back up a MySQL database to one file, dumping only the schema of oversized tables",
    long_about = None
)]
#[command(version, disable_help_flag = true)]
struct Cli {
    /// Database user
    #[arg(short = 'u', long)]
    username: Option<String>,
    /// Database to back up
    #[arg(short = 'd', long)]
    database: Option<String>,
    /// Database host
    #[arg(short = 'h', long)]
    host: Option<String>,
    /// Database port (default: 3306)
    #[arg(short = 'P', long)]
    port: Option<u16>,
    /// Tables larger than this many MB are dumped schema-only (default: 512)
    #[arg(short = 'm', long = "maxsize", value_name = "MB")]
    max_size_mb: Option<f64>,
    /// Output file; a .gz or .gzip suffix compresses (default: <database>.<YYYYMMDD>.sql.gz)
    #[arg(short = 'o', long = "outputfile")]
    output: Option<PathBuf>,
    /// Always dump the data of this table regardless of size (repeatable)
    #[arg(short = 'i', long = "includetable", value_name = "TABLE")]
    include_tables: Vec<String>,
    /// Reach the database through an SSH tunnel via [user@]host
    #[arg(short = 's', long)]
    ssh: Option<String>,
    /// SQL condition on information_schema.tables; matching tables are dumped schema-only
    #[arg(short = 'e', long = "always-empty", value_name = "PREDICATE")]
    always_empty: Option<String>,
    /// Database password (prompted for when omitted)
    #[arg(short = 'p', long)]
    password: Option<String>,
    /// Start the output with DROP DATABASE / CREATE DATABASE statements
    #[arg(long)]
    add_drop_database: bool,
    /// TOML file with defaults for any of these options
    #[arg(long = "config")]
    config_path: Option<PathBuf>,
    /// Directory for intermediate dump files (default: system temp dir)
    #[arg(long = "tmpdir")]
    tmp_dir: Option<PathBuf>,
    /// Abort if dumping takes longer than this many seconds
    #[arg(long = "timeout", value_name = "SECS")]
    timeout_secs: Option<u64>,
    /// Also write <output>.sha256
    #[arg(long)]
    checksum: bool,
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Cli {
    fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            username: self.username,
            database: self.database,
            host: self.host,
            port: self.port,
            max_size_mb: self.max_size_mb,
            output: self.output,
            force_include: self.include_tables,
            always_empty: self.always_empty,
            password: self.password,
            add_drop_database: self.add_drop_database.then_some(true),
            ssh: self.ssh,
            tmp_dir: self.tmp_dir,
            timeout_secs: self.timeout_secs,
            checksum: self.checksum.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                e.exit()
            }
            _ => {
                println!("{}", e.render());
                std::process::exit(1);
            }
        },
    };

    if let Err(err) = run(cli).await {
        let usage = err
            .downcast_ref::<BackupError>()
            .filter(|e| e.is_config())
            .map(|_| Cli::command());
        print_error_and_exit(&err, usage);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigLayer::default(),
    };
    let config = DumpConfig::resolve(
        file_layer.overlay(cli.into_layer()),
        chrono::Local::now().date_naive(),
    )?;

    // Intermediates of runs killed with SIGKILL stay behind; sweep day-old ones
    if let Err(e) = mysql_large_dump::utils::cleanup_stale_intermediates(
        &config.tmp_dir,
        Duration::from_secs(86400),
    ) {
        tracing::warn!("Failed to clean up stale intermediate files: {}", e);
    }

    commands::dump(&config).await
}

fn print_error_and_exit(err: &anyhow::Error, usage: Option<clap::Command>) -> ! {
    println!("{:#}", err);
    if let Some(mut command) = usage {
        println!();
        println!("{}", command.render_help());
    }
    std::process::exit(1)
}
