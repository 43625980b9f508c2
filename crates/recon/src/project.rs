//! Flattening of annotated records into rows of named scalar fields.
//!
//! Rows keep the report's order. Missing values render as `N/A`; lists are
//! joined with `"; "`.

use serde::Serialize;

use crate::engine::{Report, ReportRecords};
use crate::exceptions::VisibilityMode;
use crate::filter::{AccountRecord, IdentityRecord};
use crate::model::{DivergenceCode, DivergenceOccurrence};

const NA: &str = "N/A";
const SEP: &str = "; ";

fn or_na(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NA.to_string(),
    }
}

/// Distinct codes shown under `visibility`, in canonical code order.
fn visible_codes(occurrences: &[DivergenceOccurrence], visibility: VisibilityMode) -> String {
    let codes: Vec<&str> = DivergenceCode::ALL
        .iter()
        .filter(|code| {
            occurrences
                .iter()
                .any(|o| o.code == **code && visibility.includes(true, o.excepted))
        })
        .map(|code| code.as_str())
        .collect();
    if codes.is_empty() {
        NA.to_string()
    } else {
        codes.join(SEP)
    }
}

// ---------------------------------------------------------------------------
// Account rows
// ---------------------------------------------------------------------------

/// Row schema of the accounts report. Linked-identity columns are `N/A`
/// for orphan accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRow {
    pub account_key: String,
    pub system: String,
    pub account_name: String,
    pub account_email: String,
    pub account_national_id: String,
    pub account_status: String,
    /// Display names of held resources.
    pub resources: String,
    pub identity_key: String,
    pub identity_name: String,
    pub identity_national_id: String,
    pub identity_status: String,
    pub identity_user_type: String,
    pub last_login: String,
    pub divergences: String,
}

impl AccountRow {
    pub const HEADERS: [&'static str; 14] = [
        "account_key",
        "system",
        "account_name",
        "account_email",
        "account_national_id",
        "account_status",
        "resources",
        "identity_key",
        "identity_name",
        "identity_national_id",
        "identity_status",
        "identity_user_type",
        "last_login",
        "divergences",
    ];

    pub fn from_record(record: &AccountRecord, visibility: VisibilityMode) -> Self {
        let account = &record.account;
        let identity = record.identity.as_ref();
        let resources: Vec<&str> = account
            .resource_assignments
            .iter()
            .map(|r| r.display_name.as_str())
            .collect();

        Self {
            account_key: account.account_key.clone(),
            system: record.system_name.clone(),
            account_name: or_na(account.account_name.as_deref()),
            account_email: or_na(account.account_email.as_deref()),
            account_national_id: or_na(account.account_national_id.as_deref()),
            account_status: account.account_status.to_string(),
            resources: if resources.is_empty() { NA.to_string() } else { resources.join(SEP) },
            identity_key: or_na(identity.map(|i| i.identity_key.as_str())),
            identity_name: or_na(identity.and_then(|i| i.full_name.as_deref())),
            identity_national_id: or_na(identity.and_then(|i| i.national_id.as_deref())),
            identity_status: or_na(identity.map(|i| i.employment_status.as_str())),
            identity_user_type: or_na(identity.and_then(|i| i.user_type.as_deref())),
            last_login: or_na(account.attributes.last_login.as_deref()),
            divergences: visible_codes(&record.occurrences, visibility),
        }
    }

    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let values = [
            &self.account_key,
            &self.system,
            &self.account_name,
            &self.account_email,
            &self.account_national_id,
            &self.account_status,
            &self.resources,
            &self.identity_key,
            &self.identity_name,
            &self.identity_national_id,
            &self.identity_status,
            &self.identity_user_type,
            &self.last_login,
            &self.divergences,
        ];
        Self::HEADERS
            .iter()
            .zip(values)
            .map(|(name, value)| (*name, value.as_str()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Identity rows
// ---------------------------------------------------------------------------

/// Row schema of the identities report: HR fields only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityRow {
    pub identity_key: String,
    pub full_name: String,
    pub email: String,
    pub employment_status: String,
    pub user_type: String,
    pub national_id: String,
    pub created_at: String,
    pub divergences: String,
}

impl IdentityRow {
    pub const HEADERS: [&'static str; 8] = [
        "identity_key",
        "full_name",
        "email",
        "employment_status",
        "user_type",
        "national_id",
        "created_at",
        "divergences",
    ];

    pub fn from_record(record: &IdentityRecord, visibility: VisibilityMode) -> Self {
        let identity = &record.identity;
        Self {
            identity_key: identity.identity_key.clone(),
            full_name: or_na(identity.full_name.as_deref()),
            email: or_na(identity.email.as_deref()),
            employment_status: identity.employment_status.to_string(),
            user_type: or_na(identity.user_type.as_deref()),
            national_id: or_na(identity.national_id.as_deref()),
            created_at: identity
                .created_at
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| NA.to_string()),
            divergences: visible_codes(&record.occurrences, visibility),
        }
    }

    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let values = [
            &self.identity_key,
            &self.full_name,
            &self.email,
            &self.employment_status,
            &self.user_type,
            &self.national_id,
            &self.created_at,
            &self.divergences,
        ];
        Self::HEADERS
            .iter()
            .zip(values)
            .map(|(name, value)| (*name, value.as_str()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Row sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProjectedRows {
    Accounts(Vec<AccountRow>),
    Identities(Vec<IdentityRow>),
}

impl ProjectedRows {
    pub fn from_report(report: &Report) -> Self {
        let visibility = report.meta.visibility;
        match &report.records {
            ReportRecords::Accounts(records) => Self::Accounts(
                records
                    .iter()
                    .map(|r| AccountRow::from_record(r, visibility))
                    .collect(),
            ),
            ReportRecords::Identities(records) => Self::Identities(
                records
                    .iter()
                    .map(|r| IdentityRow::from_record(r, visibility))
                    .collect(),
            ),
        }
    }

    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            Self::Accounts(_) => &AccountRow::HEADERS,
            Self::Identities(_) => &IdentityRow::HEADERS,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Accounts(rows) => rows.len(),
            Self::Identities(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of every row in header order.
    pub fn records(&self) -> Vec<Vec<String>> {
        fn values(fields: Vec<(&'static str, &str)>) -> Vec<String> {
            fields.into_iter().map(|(_, v)| v.to_string()).collect()
        }
        match self {
            Self::Accounts(rows) => rows.iter().map(|r| values(r.fields())).collect(),
            Self::Identities(rows) => rows.iter().map(|r| values(r.fields())).collect(),
        }
    }
}
