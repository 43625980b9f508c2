//! Query façade: narrows the record universe for one report request and
//! decides which subjects a divergence filter keeps.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::DataQualityWarning;
use crate::engine::Evaluator;
use crate::exceptions::VisibilityMode;
use crate::model::{Account, DivergenceCode, DivergenceOccurrence, Identity, Status};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSubject {
    Accounts,
    Identities,
}

impl ReportSubject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Identities => "identities",
        }
    }
}

impl fmt::Display for ReportSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportSubject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accounts" | "account" | "contas" => Ok(Self::Accounts),
            "identities" | "identity" | "identidades" => Ok(Self::Identities),
            other => Err(format!("unknown report '{other}' (expected accounts or identities)")),
        }
    }
}

/// A single divergence code, or any code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceFilter {
    Any,
    Code(DivergenceCode),
}

impl DivergenceFilter {
    pub fn selects(&self, code: DivergenceCode) -> bool {
        match self {
            Self::Any => true,
            Self::Code(c) => *c == code,
        }
    }
}

impl fmt::Display for DivergenceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("TODAS"),
            Self::Code(code) => write!(f, "{code}"),
        }
    }
}

impl Serialize for DivergenceFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for DivergenceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TODAS" | "ANY" => Ok(Self::Any),
            _ => s.parse().map(Self::Code),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub subject: ReportSubject,
    /// Restrict to one system; `None` = all systems.
    pub system_id: Option<String>,
    pub identity_status: Option<Status>,
    pub account_status: Option<Status>,
    pub divergence: Option<DivergenceFilter>,
    pub visibility: VisibilityMode,
    /// Case-insensitive substring of a held resource's display name.
    pub resource_contains: Option<String>,
    /// Case-insensitive substring of the identity's user type.
    pub user_type_contains: Option<String>,
    /// Evaluation time for time-based checks.
    pub now: DateTime<Utc>,
}

impl FilterRequest {
    pub fn new(subject: ReportSubject, now: DateTime<Utc>) -> Self {
        Self {
            subject,
            system_id: None,
            identity_status: None,
            account_status: None,
            divergence: None,
            visibility: VisibilityMode::default(),
            resource_contains: None,
            user_type_contains: None,
            now,
        }
    }

    /// The requested divergence filter, or `Any` when only a non-default
    /// visibility was asked for.
    pub fn effective_divergence(&self) -> Option<DivergenceFilter> {
        match self.divergence {
            Some(filter) => Some(filter),
            None if self.visibility != VisibilityMode::default() => Some(DivergenceFilter::Any),
            None => None,
        }
    }

    /// Filters that only make sense on accounts.
    pub fn has_account_filters(&self) -> bool {
        self.account_status.is_some() || non_blank(&self.resource_contains).is_some()
    }

    fn identity_matches(&self, identity: &Identity) -> bool {
        if let Some(status) = self.identity_status {
            if identity.employment_status != status {
                return false;
            }
        }
        if let Some(needle) = non_blank(&self.user_type_contains) {
            if !contains_ci(identity.user_type.as_deref(), needle) {
                return false;
            }
        }
        true
    }

    /// System, account status and resource predicates.
    fn account_matches(&self, account: &Account) -> bool {
        if let Some(system) = self.system_id.as_deref() {
            if account.system_id != system {
                return false;
            }
        }
        if let Some(status) = self.account_status {
            if account.account_status != status {
                return false;
            }
        }
        if let Some(needle) = non_blank(&self.resource_contains) {
            if !account
                .resource_assignments
                .iter()
                .any(|r| contains_ci(Some(&r.display_name), needle))
            {
                return false;
            }
        }
        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

/// True when some occurrence carries a selected code and the overlay shows it.
pub fn is_selected(
    filter: DivergenceFilter,
    visibility: VisibilityMode,
    occurrences: &[DivergenceOccurrence],
) -> bool {
    occurrences
        .iter()
        .any(|o| filter.selects(o.code) && visibility.includes(true, o.excepted))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An account with its linked identity and every occurrence raised on it.
#[derive(Debug, Clone, Serialize)]
pub struct AccountRecord {
    pub account: Account,
    pub system_name: String,
    pub identity: Option<Identity>,
    pub occurrences: Vec<DivergenceOccurrence>,
}

/// An identity with its ACCESS_NOT_GRANTED occurrences plus the occurrences
/// of its in-scope accounts.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityRecord {
    pub identity: Identity,
    pub occurrences: Vec<DivergenceOccurrence>,
}

// ---------------------------------------------------------------------------
// Accounts report
// ---------------------------------------------------------------------------

pub fn accounts_report(
    ev: &Evaluator<'_>,
    request: &FilterRequest,
    warnings: &mut Vec<DataQualityWarning>,
) -> Vec<AccountRecord> {
    let effective = request.effective_divergence();
    let index = ev.index();

    let mut records: Vec<AccountRecord> = Vec::new();
    for account in ev.accounts() {
        if !request.account_matches(account) {
            continue;
        }
        let identity = index.linked_identity(account);
        let needs_identity = request.identity_status.is_some()
            || non_blank(&request.user_type_contains).is_some();
        if needs_identity && !identity.is_some_and(|i| request.identity_matches(i)) {
            continue;
        }

        let occurrences = ev.account_occurrences(account, identity, warnings);
        if let Some(filter) = effective {
            if !is_selected(filter, request.visibility, &occurrences) {
                continue;
            }
        }

        records.push(AccountRecord {
            account: account.clone(),
            system_name: index.system_name(&account.system_id).to_string(),
            identity: identity.cloned(),
            occurrences,
        });
    }

    records.sort_by(|a, b| a.system_name.cmp(&b.system_name));
    log::debug!("accounts report: {} records", records.len());
    records
}

// ---------------------------------------------------------------------------
// Identities report
// ---------------------------------------------------------------------------

pub fn identities_report(
    ev: &Evaluator<'_>,
    request: &FilterRequest,
    warnings: &mut Vec<DataQualityWarning>,
) -> Vec<IdentityRecord> {
    let effective = request.effective_divergence();
    let index = ev.index();

    let mut narrowed: Vec<&Identity> = ev
        .identities()
        .iter()
        .filter(|i| request.identity_matches(i))
        .collect();
    narrowed.sort_by_key(|i| i.full_name.as_deref().unwrap_or("").to_lowercase());

    let account_level_code = match effective {
        Some(DivergenceFilter::Any) => true,
        Some(DivergenceFilter::Code(code)) => code.is_account_level(),
        None => false,
    };
    let account_path = account_level_code || request.has_account_filters();
    let identity_path = matches!(
        effective,
        Some(DivergenceFilter::Any) | Some(DivergenceFilter::Code(DivergenceCode::AccessNotGranted))
    );
    let narrowing = account_path || identity_path;
    // An identity-only code cannot select accounts; the account path then
    // applies the account filters alone.
    let account_filter = effective
        .filter(|f| !matches!(f, DivergenceFilter::Code(code) if !code.is_account_level()));

    let mut qualifying: HashSet<&str> = HashSet::new();
    let mut records = Vec::with_capacity(narrowed.len());

    for &identity in &narrowed {
        let key = identity.identity_key.as_str();
        let mut occurrences = Vec::new();

        for account in index.accounts_of(key) {
            if !request.account_matches(account) {
                continue;
            }
            let found = ev.account_occurrences(account, Some(identity), warnings);
            if account_path
                && account_filter.map_or(true, |f| is_selected(f, request.visibility, &found))
            {
                qualifying.insert(key);
            }
            occurrences.extend(found);
        }

        let missing = ev.identity_occurrences(identity, request.system_id.as_deref());
        if identity_path {
            let filter = DivergenceFilter::Code(DivergenceCode::AccessNotGranted);
            if is_selected(filter, request.visibility, &missing) {
                qualifying.insert(key);
            }
        }
        occurrences.extend(missing);

        records.push(IdentityRecord {
            identity: identity.clone(),
            occurrences,
        });
    }

    if narrowing {
        records.retain(|r| qualifying.contains(r.identity.identity_key.as_str()));
    }
    log::debug!("identities report: {} records", records.len());
    records
}
