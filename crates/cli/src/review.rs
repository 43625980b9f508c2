//! `agrid evaluate`, `agrid summary`, `agrid validate`: config-driven access review.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::ValueEnum;

use accessgrid_recon::detect::parse_timestamp;
use accessgrid_recon::engine::{evaluate, load_snapshot, Evaluator};
use accessgrid_recon::model::{DivergenceCode, Snapshot, Status};
use accessgrid_recon::{
    compute_summary, CsvSource, DivergenceFilter, FilterRequest, ReconError, ReportSubject,
    Summary, VisibilityMode,
};

use crate::exit_codes::{
    recon_exit_code, EXIT_ERROR, EXIT_INVALID_CONFIG, EXIT_NO_ROWS, EXIT_USAGE,
};
use crate::export::{render, OutputFormat};
use crate::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportArg {
    Accounts,
    Identities,
}

impl From<ReportArg> for ReportSubject {
    fn from(arg: ReportArg) -> Self {
        match arg {
            ReportArg::Accounts => ReportSubject::Accounts,
            ReportArg::Identities => ReportSubject::Identities,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VisibilityArg {
    /// Divergences without an exception
    DivergentOnly,
    /// Divergences acknowledged by an exception
    ExceptionsOnly,
    /// Every divergence
    All,
}

impl From<VisibilityArg> for VisibilityMode {
    fn from(arg: VisibilityArg) -> Self {
        match arg {
            VisibilityArg::DivergentOnly => VisibilityMode::DivergentOnly,
            VisibilityArg::ExceptionsOnly => VisibilityMode::ExceptionsOnly,
            VisibilityArg::All => VisibilityMode::All,
        }
    }
}

/// Filters of one `agrid evaluate` run, as given on the command line.
pub struct EvaluateArgs {
    pub config: PathBuf,
    pub report: ReportArg,
    pub system: Option<String>,
    pub identity_status: Option<Status>,
    pub account_status: Option<Status>,
    pub divergence: Option<DivergenceFilter>,
    pub visibility: VisibilityArg,
    pub resource: Option<String>,
    pub user_type: Option<String>,
    pub now: Option<String>,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
}

fn review_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn engine_err(err: ReconError) -> CliError {
    review_err(recon_exit_code(&err), err.to_string())
}

/// Open the run config. An unreadable file is a usage error; everything
/// else wrong with it is an invalid config.
pub(crate) fn open_config(path: &Path) -> Result<CsvSource, CliError> {
    CsvSource::open(path).map_err(|e| match e {
        ReconError::Io(msg) => review_err(EXIT_USAGE, format!("cannot read config: {msg}")),
        other => review_err(EXIT_INVALID_CONFIG, other.to_string()),
    })
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>, CliError> {
    match now {
        None => Ok(Utc::now()),
        Some(text) => parse_timestamp(text).ok_or_else(|| {
            review_err(EXIT_USAGE, format!("invalid --now value: {text}"))
                .with_hint("use RFC 3339 (2026-06-30T12:00:00Z) or a date (2026-06-30)")
        }),
    }
}

fn load(source: &CsvSource, system_filter: Option<&str>) -> Result<Snapshot, CliError> {
    let tenant = source.config().tenant.clone();
    load_snapshot(source, &tenant, system_filter).map_err(engine_err)
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

pub fn cmd_evaluate(args: EvaluateArgs) -> Result<(), CliError> {
    let source = open_config(&args.config)?;
    let now = parse_now(args.now.as_deref())?;

    if let Some(ref system) = args.system {
        if !source.config().systems.contains_key(system) {
            return Err(review_err(EXIT_USAGE, format!("unknown system: {system}"))
                .with_hint(format!("configured systems: {}", system_list(&source))));
        }
    }

    let subject = ReportSubject::from(args.report);
    let mut request = FilterRequest::new(subject, now);
    request.system_id = args.system;
    request.identity_status = args.identity_status;
    request.account_status = args.account_status;
    request.divergence = args.divergence;
    request.visibility = args.visibility.into();
    request.resource_contains = args.resource;
    request.user_type_contains = args.user_type;

    let system_filter = match subject {
        ReportSubject::Accounts => request.system_id.clone(),
        ReportSubject::Identities => None,
    };
    let snapshot = load(&source, system_filter.as_deref())?;
    let report = evaluate(&snapshot, &request, &source.config().detection).map_err(engine_err)?;

    let body = render(&report, args.format)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &body)
            .map_err(|e| review_err(EXIT_ERROR, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    } else {
        print!("{body}");
        if !body.ends_with('\n') {
            println!();
        }
    }

    let divergence = request
        .effective_divergence()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "none".into());
    eprintln!(
        "{} report: {} rows (divergence: {}, visibility: {}, {} data-quality warnings)",
        report.subject(),
        report.len(),
        divergence,
        request.visibility,
        report.warnings.len(),
    );

    if report.is_empty() {
        return Err(review_err(EXIT_NO_ROWS, "no rows matched"));
    }
    Ok(())
}

fn system_list(source: &CsvSource) -> String {
    source.config().systems.keys().cloned().collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// summary
// ---------------------------------------------------------------------------

pub fn cmd_summary(config: PathBuf, now: Option<String>, json_output: bool) -> Result<(), CliError> {
    let source = open_config(&config)?;
    let now = parse_now(now.as_deref())?;
    let snapshot = load(&source, None)?;
    let summary =
        compute_summary(&snapshot, &source.config().detection, now).map_err(engine_err)?;

    if json_output {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| review_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json}");
    } else {
        print!("{}", format_summary(&source.config().name, &summary));
    }
    Ok(())
}

fn format_summary(name: &str, s: &Summary) -> String {
    let mut out = String::new();
    out.push_str(&format!("{name}\n"));
    out.push_str(&format!(
        "identities: {} ({} active, {} inactive)\n",
        s.identities, s.active_identities, s.inactive_identities
    ));
    out.push_str(&format!(
        "accounts:   {} ({} active, {} inactive)\n",
        s.accounts, s.active_accounts, s.inactive_accounts
    ));
    out.push_str(&format!(
        "divergences: {} open, {} excepted\n",
        s.total_open(),
        s.total_excepted()
    ));
    for code in DivergenceCode::ALL {
        let open = s.open.get(&code).copied().unwrap_or(0);
        let excepted = s.excepted.get(&code).copied().unwrap_or(0);
        if open + excepted > 0 {
            out.push_str(&format!("  {:<20} {:>5} open {:>5} excepted\n", code.as_str(), open, excepted));
        }
    }
    if !s.open_by_system.is_empty() {
        out.push_str("open by system:\n");
        for (system, count) in &s.open_by_system {
            out.push_str(&format!("  {system:<20} {count:>5}\n"));
        }
    }
    if s.warnings > 0 {
        out.push_str(&format!("data-quality warnings: {}\n", s.warnings));
    }
    out
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// Parse the config, load every source and check the snapshot for
/// consistency without producing a report.
pub fn cmd_validate(config: PathBuf) -> Result<(), CliError> {
    let source = open_config(&config)?;
    let snapshot = load(&source, None)?;
    Evaluator::new(&snapshot, &source.config().detection, Utc::now()).map_err(engine_err)?;

    eprintln!(
        "config ok: {} systems, {} identities, {} accounts, {} sod rules, {} exceptions",
        snapshot.systems.len(),
        snapshot.identities.len(),
        snapshot.accounts.len(),
        snapshot.sod_rules.len(),
        snapshot.exceptions.len(),
    );
    Ok(())
}
