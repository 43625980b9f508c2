//! `agrid exception`: maintain the operator exception file a run config names.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};

use accessgrid_recon::load::load_exceptions;
use accessgrid_recon::model::{DivergenceCode, SystemKind};
use accessgrid_recon::{CsvSource, Exception, ExceptionSet};

use crate::exit_codes::{EXIT_ERROR, EXIT_INVALID_CONFIG, EXIT_LOAD_FAILED, EXIT_USAGE};
use crate::review::open_config;
use crate::CliError;

#[derive(Subcommand)]
pub enum ExceptionCommands {
    /// Acknowledge a divergence so it is hidden from the default view
    #[command(after_help = "\
Examples:
  agrid exception add review.recon.toml --system erp --account svc_batch --code ORPHAN_ACCOUNT
  agrid exception add review.recon.toml --identity u4 --target-system crm")]
    Add {
        /// Path to the .recon.toml config file
        config: PathBuf,

        #[command(flatten)]
        key: ExceptionKeyArgs,
    },

    /// Withdraw an acknowledgment
    #[command(after_help = "\
Examples:
  agrid exception remove review.recon.toml --system erp --account svc_batch --code ORPHAN_ACCOUNT")]
    Remove {
        /// Path to the .recon.toml config file
        config: PathBuf,

        #[command(flatten)]
        key: ExceptionKeyArgs,
    },

    /// List recorded exceptions
    #[command(after_help = "\
Examples:
  agrid exception list review.recon.toml
  agrid exception list review.recon.toml --json")]
    List {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Output JSON to stdout instead of one line per exception
        #[arg(long)]
        json: bool,
    },
}

/// Either an account-level key (`--account --system --code`) or an
/// access-not-granted key (`--identity --target-system`).
#[derive(Args, Debug, Clone)]
pub struct ExceptionKeyArgs {
    /// Account key in the source system
    #[arg(long, requires_all = ["system", "code"], conflicts_with_all = ["identity", "target_system"])]
    pub account: Option<String>,

    /// System owning the account
    #[arg(long, requires = "account")]
    pub system: Option<String>,

    /// Divergence code to acknowledge on the account
    #[arg(long, requires = "account")]
    pub code: Option<DivergenceCode>,

    /// HR identity key missing an account
    #[arg(long, requires = "target_system")]
    pub identity: Option<String>,

    /// System the identity has no account in
    #[arg(long, requires = "identity")]
    pub target_system: Option<String>,
}

pub fn cmd_exception(cmd: ExceptionCommands) -> Result<(), CliError> {
    match cmd {
        ExceptionCommands::Add { config, key } => cmd_exception_add(config, key),
        ExceptionCommands::Remove { config, key } => cmd_exception_remove(config, key),
        ExceptionCommands::List { config, json } => cmd_exception_list(config, json),
    }
}

fn exc_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

fn require_application_system(source: &CsvSource, system_id: &str) -> Result<(), CliError> {
    match source.config().systems.get(system_id) {
        Some(system) if system.kind == SystemKind::Application => Ok(()),
        Some(_) => Err(exc_err(
            EXIT_USAGE,
            format!("system '{system_id}' is the HR source; exceptions apply to application systems"),
        )),
        None => Err(exc_err(EXIT_USAGE, format!("unknown system: {system_id}"))),
    }
}

fn exception_from_args(source: &CsvSource, key: ExceptionKeyArgs) -> Result<Exception, CliError> {
    match key {
        ExceptionKeyArgs {
            account: Some(account_key),
            system: Some(system_id),
            code: Some(code),
            ..
        } => {
            if code == DivergenceCode::AccessNotGranted {
                return Err(exc_err(EXIT_USAGE, "ACCESS_NOT_GRANTED is not an account-level code")
                    .with_hint("use --identity KEY --target-system ID instead"));
            }
            require_application_system(source, &system_id)?;
            Ok(Exception::Account { system_id, account_key, code })
        }
        ExceptionKeyArgs {
            identity: Some(identity_key),
            target_system: Some(target_system),
            ..
        } => {
            require_application_system(source, &target_system)?;
            Ok(Exception::AccessNotGranted { identity_key, target_system })
        }
        _ => Err(exc_err(EXIT_USAGE, "no exception key given").with_hint(
            "pass --account KEY --system ID --code CODE, or --identity KEY --target-system ID",
        )),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

fn store_path(source: &CsvSource) -> Result<PathBuf, CliError> {
    source.exceptions_path().ok_or_else(|| {
        exc_err(EXIT_INVALID_CONFIG, "config names no exceptions file")
            .with_hint("add `exceptions = \"exceptions.json\"` to the config")
    })
}

/// A missing store reads as empty.
fn read_store(path: &Path) -> Result<ExceptionSet, CliError> {
    if !path.exists() {
        return Ok(ExceptionSet::new());
    }
    let json = std::fs::read_to_string(path)
        .map_err(|e| exc_err(EXIT_LOAD_FAILED, format!("cannot read {}: {e}", path.display())))?;
    let file = path.display().to_string();
    let exceptions =
        load_exceptions(&file, &json).map_err(|e| exc_err(EXIT_LOAD_FAILED, e.to_string()))?;
    Ok(exceptions.into_iter().collect())
}

/// Write through a sibling temp file so readers never see a partial store.
fn write_store(path: &Path, set: &ExceptionSet) -> Result<(), CliError> {
    let mut json = serde_json::to_string_pretty(set)
        .map_err(|e| exc_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
    json.push('\n');

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| exc_err(EXIT_ERROR, format!("cannot write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| exc_err(EXIT_ERROR, format!("cannot write {}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_exception_add(config: PathBuf, key: ExceptionKeyArgs) -> Result<(), CliError> {
    let source = open_config(&config)?;
    let exception = exception_from_args(&source, key)?;
    let path = store_path(&source)?;
    let mut set = read_store(&path)?;

    if set.upsert(exception.clone()) {
        write_store(&path, &set)?;
        log::info!("exception store {} now holds {} entries", path.display(), set.len());
        eprintln!("added: {exception}");
    } else {
        eprintln!("already recorded: {exception}");
    }
    Ok(())
}

fn cmd_exception_remove(config: PathBuf, key: ExceptionKeyArgs) -> Result<(), CliError> {
    let source = open_config(&config)?;
    let exception = exception_from_args(&source, key)?;
    let path = store_path(&source)?;
    let mut set = read_store(&path)?;

    if !set.remove(&exception) {
        return Err(exc_err(EXIT_ERROR, format!("no such exception: {exception}"))
            .with_hint("see `agrid exception list`"));
    }
    write_store(&path, &set)?;
    eprintln!("removed: {exception}");
    Ok(())
}

fn cmd_exception_list(config: PathBuf, json_output: bool) -> Result<(), CliError> {
    let source = open_config(&config)?;
    let set = match source.exceptions_path() {
        Some(path) => read_store(&path)?,
        None => ExceptionSet::new(),
    };

    if json_output {
        let json = serde_json::to_string_pretty(&set)
            .map_err(|e| exc_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json}");
    } else {
        for exception in set.iter() {
            println!("{exception}");
        }
        eprintln!("{} exceptions", set.len());
    }
    Ok(())
}
