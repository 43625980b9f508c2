//! Report rendering for `agrid evaluate`.
//!
//! - `csv`: one header line plus one line per projected row
//! - `json`: array of projected rows keyed by column name
//! - `report`: annotated records with occurrences and run metadata

use clap::ValueEnum;

use accessgrid_recon::{ProjectedRows, Report};

use crate::exit_codes::EXIT_ERROR;
use crate::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Flat rows, comma-separated
    Csv,
    /// Flat rows as a JSON array
    Json,
    /// Annotated records with divergence evidence (JSON)
    Report,
}

pub fn render(report: &Report, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Csv => render_csv(&report.rows()),
        OutputFormat::Json => to_json(&report.rows()),
        OutputFormat::Report => to_json(report),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliError { code: EXIT_ERROR, message: format!("JSON serialization error: {e}"), hint: None })
}

/// Header row is always written, even for an empty report.
pub fn render_csv(rows: &ProjectedRows) -> Result<String, CliError> {
    let err = |e: String| CliError { code: EXIT_ERROR, message: format!("CSV write error: {e}"), hint: None };

    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(rows.headers()).map_err(|e| err(e.to_string()))?;
    for record in rows.records() {
        wtr.write_record(&record).map_err(|e| err(e.to_string()))?;
    }
    let bytes = wtr.into_inner().map_err(|e| err(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessgrid_recon::IdentityRow;

    fn row(key: &str, name: &str) -> IdentityRow {
        IdentityRow {
            identity_key: key.into(),
            full_name: name.into(),
            email: "N/A".into(),
            employment_status: "Active".into(),
            user_type: "Employee".into(),
            national_id: "N/A".into(),
            created_at: "N/A".into(),
            divergences: "ZOMBIE_ACCOUNT; SOD_VIOLATION".into(),
        }
    }

    #[test]
    fn empty_report_still_has_headers() {
        let out = render_csv(&ProjectedRows::Identities(vec![])).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("identity_key,"));
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let out = render_csv(&ProjectedRows::Identities(vec![row("u1", "Souza, Maria")])).unwrap();
        let body = out.lines().nth(1).unwrap();
        assert!(body.starts_with("u1,\"Souza, Maria\","));
        assert!(body.ends_with("ZOMBIE_ACCOUNT; SOD_VIOLATION"));
    }
}
