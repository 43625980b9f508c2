// AccessGrid CLI - headless access review over HR and application account exports

mod exceptions;
mod exit_codes;
mod export;
mod review;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use accessgrid_recon::model::Status;
use accessgrid_recon::DivergenceFilter;

use exceptions::ExceptionCommands;
use exit_codes::EXIT_SUCCESS;
use export::OutputFormat;
use review::{EvaluateArgs, ReportArg, VisibilityArg};

#[derive(Parser)]
#[command(name = "agrid")]
#[command(about = "Identity and account divergence review (headless)")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Log filter for diagnostics on stderr (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "AGRID_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a report over the snapshot a config describes
    #[command(after_help = "\
Filters combine with AND. --divergence TODAS keeps subjects with any code;
without --divergence no divergence filtering happens unless --visibility
is exceptions-only or all.

Examples:
  agrid evaluate review.recon.toml --report accounts
  agrid evaluate review.recon.toml --report accounts --system erp --divergence ORPHAN_ACCOUNT
  agrid evaluate review.recon.toml --report identities --divergence TODAS --format json
  agrid evaluate review.recon.toml --report accounts --visibility exceptions-only --output excepted.csv
  agrid evaluate review.recon.toml --report accounts --now 2026-06-30T00:00:00Z --format report")]
    Evaluate {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Report subject
        #[arg(long, value_enum, default_value = "accounts")]
        report: ReportArg,

        /// Restrict to one system id
        #[arg(long)]
        system: Option<String>,

        /// HR employment status (Active/Inactive, Ativo/Inativo)
        #[arg(long)]
        identity_status: Option<Status>,

        /// Account status (Active/Inactive, Ativo/Inativo)
        #[arg(long)]
        account_status: Option<Status>,

        /// Divergence code, or TODAS for any code
        #[arg(long)]
        divergence: Option<DivergenceFilter>,

        /// Which divergences count with respect to exceptions
        #[arg(long, value_enum, default_value = "divergent-only")]
        visibility: VisibilityArg,

        /// Substring of a held resource's display name
        #[arg(long)]
        resource: Option<String>,

        /// Substring of the HR user type
        #[arg(long)]
        user_type: Option<String>,

        /// Evaluation time (RFC 3339 or YYYY-MM-DD), default now
        #[arg(long)]
        now: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: OutputFormat,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Tenant-wide identity, account and divergence counts
    #[command(after_help = "\
Examples:
  agrid summary review.recon.toml
  agrid summary review.recon.toml --json")]
    Summary {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Evaluation time (RFC 3339 or YYYY-MM-DD), default now
        #[arg(long)]
        now: Option<String>,

        /// Output JSON to stdout instead of a human summary
        #[arg(long)]
        json: bool,
    },

    /// Validate a config and the data it points at without reporting
    #[command(after_help = "\
Examples:
  agrid validate review.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },

    /// Manage operator exceptions
    #[command(subcommand)]
    Exception(ExceptionCommands),
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("warning: invalid log level '{level}' ({e}), using warn");
        EnvFilter::new("warn")
    });
    // Ignore a second init; a subscriber may already be installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        None => {
            // No subcommand = show help
            eprintln!("Usage: agrid <command> [options]");
            eprintln!("       agrid --help for more information");
            Ok(())
        }
        Some(Commands::Evaluate {
            config,
            report,
            system,
            identity_status,
            account_status,
            divergence,
            visibility,
            resource,
            user_type,
            now,
            format,
            output,
        }) => review::cmd_evaluate(EvaluateArgs {
            config,
            report,
            system,
            identity_status,
            account_status,
            divergence,
            visibility,
            resource,
            user_type,
            now,
            format,
            output,
        }),
        Some(Commands::Summary { config, now, json }) => review::cmd_summary(config, now, json),
        Some(Commands::Validate { config }) => review::cmd_validate(config),
        Some(Commands::Exception(cmd)) => exceptions::cmd_exception(cmd),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
