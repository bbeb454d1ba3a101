use anyhow::{Context, Result};
use caixa_reconcile::Config;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

const CONFIG_FILE: &str = "caixa.toml";

/// Reconciles OFX bank statements against the Omie ERP.
#[derive(Debug, Parser)]
#[command(name = "caixa", author, version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ./caixa.toml, then the user config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Match a statement against the ERP ledger and create missing entries.
    Reconcile {
        /// ERP bank account code (nCodCC). Defaults to the `[[accounts]]`
        /// entry matching the statement.
        #[arg(short, long)]
        account: Option<i64>,
        /// OFX statement file.
        file: PathBuf,
        /// Report what would be created without writing to the ERP.
        #[arg(long)]
        dry_run: bool,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Train the categorizer from statements already reconciled in the ERP.
    Learn {
        /// ERP bank account code, overriding `[[accounts]]`.
        #[arg(short, long)]
        account: Option<i64>,
        /// OFX statement files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Skip transactions whose external id was already seen.
        #[arg(long)]
        dedupe: bool,
    },
    /// Show model, learning data and recent runs.
    Stats {
        /// Number of recent runs to list.
        #[arg(long, default_value_t = 10)]
        runs: u32,
    },
    /// Retrain the model from scratch using the stored learning data.
    Rebuild,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Reconcile {
            account,
            file,
            dry_run,
            json,
        } => commands::reconcile(&config, account, &file, dry_run, json).await,
        Command::Learn {
            account,
            files,
            dedupe,
        } => commands::learn(&config, account, &files, dedupe).await,
        Command::Stats { runs } => commands::stats(&config, runs).await,
        Command::Rebuild => commands::rebuild(&config).await,
    }
}

/// An explicit `--config` must exist. Otherwise the first file found wins, and
/// without any file the data lives in the user data directory.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path).with_context(|| format!("loading {}", path.display()));
    }

    let project_dirs = directories::ProjectDirs::from("br", "caixa", "Caixa");
    let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(dirs) = &project_dirs {
        candidates.push(dirs.config_dir().join(CONFIG_FILE));
    }
    if let Some(path) = candidates.iter().find(|p| p.is_file()) {
        tracing::debug!(path = %path.display(), "Using config file");
        return Config::load(path).with_context(|| format!("loading {}", path.display()));
    }

    let mut config = Config::from_env();
    if let Some(dirs) = &project_dirs {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;
        config.storage.database_path = data_dir.join("caixa.db");
        config.categorizer.model_path = data_dir.join("model.json");
    }
    Ok(config)
}
