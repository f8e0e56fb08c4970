//! Operator CLI for the quota engine.
//!
//! ```bash
//! notequota tiers
//! notequota usage --db ledger.sqlite3 --account <uuid>
//! notequota reconcile --db ledger.sqlite3 --storage-dir /srv/objects --account <uuid>
//! notequota repair --db ledger.sqlite3 --account <uuid>
//! ```

use clap::{Parser, Subcommand};
use log::info;
use notequota_core::{
    init_stderr_logging, open_db, AccountId, EngineConfig, EngineContext, FsObjectStore,
    MemoryObjectStore, ObjectStore,
};
use serde_json::json;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "notequota")]
#[command(version)]
#[command(about = "Quota ledger operator tools", long_about = None)]
struct Cli {
    /// JSON engine config. Built-in defaults apply when absent.
    #[arg(long, global = true, env = "NOTEQUOTA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level written to stderr
    #[arg(long, global = true, env = "NOTEQUOTA_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tier table
    Tiers,
    /// Print an account's usage report
    Usage {
        #[arg(long, env = "NOTEQUOTA_DB")]
        db: PathBuf,
        #[arg(long, value_parser = parse_account_id)]
        account: AccountId,
    },
    /// Compare ledger counters with live rows without changing them
    Audit {
        #[arg(long, env = "NOTEQUOTA_DB")]
        db: PathBuf,
        #[arg(long, value_parser = parse_account_id)]
        account: AccountId,
    },
    /// Delete storage objects no live note references
    Reconcile {
        #[arg(long, env = "NOTEQUOTA_DB")]
        db: PathBuf,
        #[arg(long, env = "NOTEQUOTA_STORAGE_DIR")]
        storage_dir: PathBuf,
        #[arg(long, value_parser = parse_account_id)]
        account: AccountId,
    },
    /// Overwrite drifted ledger counters with live recounts
    Repair {
        #[arg(long, env = "NOTEQUOTA_DB")]
        db: PathBuf,
        #[arg(long, value_parser = parse_account_id)]
        account: AccountId,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Tiers => "tiers",
            Self::Usage { .. } => "usage",
            Self::Audit { .. } => "audit",
            Self::Reconcile { .. } => "reconcile",
            Self::Repair { .. } => "repair",
        }
    }
}

fn parse_account_id(value: &str) -> Result<AccountId, String> {
    AccountId::parse_str(value.trim()).map_err(|err| format!("invalid account id: {err}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_stderr_logging(&cli.log_level) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    info!(
        "event=cli_run module=cli status=start command={}",
        cli.command.name()
    );

    match cli.command {
        Commands::Tiers => {
            let table = config.tier_table()?;
            let tiers: Vec<_> = table.policies().collect();
            print_json(&json!({
                "defaultTier": table.default_tier(),
                "tiers": tiers,
            }))
        }
        Commands::Usage { db, account } => {
            let ctx = context(config, None)?;
            let conn = open_db(&db)?;
            print_json(&ctx.engine(&conn)?.usage(account)?)
        }
        Commands::Audit { db, account } => {
            let ctx = context(config, None)?;
            let conn = open_db(&db)?;
            print_json(&ctx.engine(&conn)?.audit(account)?)
        }
        Commands::Reconcile {
            db,
            storage_dir,
            account,
        } => {
            let ctx = context(config, Some(&storage_dir))?;
            let conn = open_db(&db)?;
            print_json(&ctx.engine(&conn)?.reconcile(account)?)
        }
        Commands::Repair { db, account } => {
            let ctx = context(config, None)?;
            let conn = open_db(&db)?;
            print_json(&ctx.engine(&conn)?.repair(account)?)
        }
    }
}

/// Commands that never touch objects run on an empty in-memory store.
fn context(
    config: EngineConfig,
    storage_dir: Option<&Path>,
) -> Result<EngineContext, Box<dyn Error>> {
    let store: Arc<dyn ObjectStore> = match storage_dir {
        Some(dir) => Arc::new(FsObjectStore::new(dir)?),
        None => Arc::new(MemoryObjectStore::new()),
    };
    Ok(EngineContext::new(config, store)?)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
