//! Divergence detectors.
//!
//! Account-level detectors share one signature and live in a single table
//! (`ACCOUNT_DETECTORS`) so the per-code filters and the "any code"
//! aggregate walk the same list. ACCESS_NOT_GRANTED is the only
//! identity-level check and is evaluated per (identity, system) pair.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::config::DetectionSettings;
use crate::index::Index;
use crate::model::{
    Account, DivergenceCode, DivergenceOccurrence, Evidence, Identity, SodRule, Status, SubjectRef,
    System,
};

/// Everything a detector may read for one account.
pub struct AccountContext<'a> {
    pub account: &'a Account,
    pub identity: Option<&'a Identity>,
    /// Global rules plus rules scoped to the account's system.
    pub rules: &'a [&'a SodRule],
    pub settings: &'a DetectionSettings,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Clear,
    Divergent(Option<Evidence>),
}

impl Check {
    pub fn is_divergent(&self) -> bool {
        matches!(self, Self::Divergent(_))
    }
}

pub struct AccountDetector {
    pub code: DivergenceCode,
    pub check: fn(&AccountContext<'_>) -> Check,
}

/// Canonical evaluation order for the "any code" aggregate.
pub static ACCOUNT_DETECTORS: [AccountDetector; 8] = [
    AccountDetector { code: DivergenceCode::ZombieAccount, check: zombie_account },
    AccountDetector { code: DivergenceCode::OrphanAccount, check: orphan_account },
    AccountDetector { code: DivergenceCode::CpfMismatch, check: cpf_mismatch },
    AccountDetector { code: DivergenceCode::NameMismatch, check: name_mismatch },
    AccountDetector { code: DivergenceCode::EmailMismatch, check: email_mismatch },
    AccountDetector { code: DivergenceCode::UsertypeMismatch, check: usertype_mismatch },
    AccountDetector { code: DivergenceCode::DormantAdmin, check: dormant_admin },
    AccountDetector { code: DivergenceCode::SodViolation, check: sod_violation },
];

pub fn account_detector(code: DivergenceCode) -> Option<&'static AccountDetector> {
    ACCOUNT_DETECTORS.iter().find(|d| d.code == code)
}

/// Run every account detector. Occurrences come back un-excepted; the
/// exception overlay marks them.
pub fn detect_account(ctx: &AccountContext<'_>) -> Vec<DivergenceOccurrence> {
    ACCOUNT_DETECTORS
        .iter()
        .filter_map(|d| match (d.check)(ctx) {
            Check::Clear => None,
            Check::Divergent(evidence) => Some(DivergenceOccurrence {
                subject: ctx.account.subject(),
                code: d.code,
                target_system: None,
                evidence,
                excepted: false,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Account detectors
// ---------------------------------------------------------------------------

pub fn zombie_account(ctx: &AccountContext<'_>) -> Check {
    match ctx.identity {
        Some(identity)
            if identity.employment_status == Status::Inactive
                && ctx.account.account_status == Status::Active =>
        {
            Check::Divergent(Some(Evidence::Values {
                hr: identity.employment_status.to_string(),
                account: ctx.account.account_status.to_string(),
            }))
        }
        _ => Check::Clear,
    }
}

pub fn orphan_account(ctx: &AccountContext<'_>) -> Check {
    if ctx.identity.is_none() {
        Check::Divergent(None)
    } else {
        Check::Clear
    }
}

pub fn cpf_mismatch(ctx: &AccountContext<'_>) -> Check {
    let Some(identity) = ctx.identity else {
        return Check::Clear;
    };
    compare_present(
        identity.national_id.as_deref(),
        ctx.account.account_national_id.as_deref(),
        digits_only,
    )
}

pub fn name_mismatch(ctx: &AccountContext<'_>) -> Check {
    let Some(identity) = ctx.identity else {
        return Check::Clear;
    };
    compare_present(
        identity.full_name.as_deref(),
        ctx.account.account_name.as_deref(),
        normalize_text,
    )
}

pub fn email_mismatch(ctx: &AccountContext<'_>) -> Check {
    let Some(identity) = ctx.identity else {
        return Check::Clear;
    };
    compare_present(
        identity.email.as_deref(),
        ctx.account.account_email.as_deref(),
        normalize_text,
    )
}

pub fn usertype_mismatch(ctx: &AccountContext<'_>) -> Check {
    let Some(identity) = ctx.identity else {
        return Check::Clear;
    };
    compare_present(
        identity.user_type.as_deref(),
        ctx.account.attributes.user_type.as_deref(),
        normalize_text,
    )
}

pub fn dormant_admin(ctx: &AccountContext<'_>) -> Check {
    let account = ctx.account;
    if account.account_status != Status::Active || !holds_admin(account, &ctx.settings.admin_marker) {
        return Check::Clear;
    }
    let Some(raw) = present(account.attributes.last_login.as_deref()) else {
        return Check::Clear;
    };
    let Some(last_login) = parse_timestamp(raw) else {
        return Check::Clear;
    };
    let Some(threshold) = ctx
        .now
        .checked_sub_signed(Duration::days(i64::from(ctx.settings.dormancy_days)))
    else {
        return Check::Clear;
    };
    if last_login < threshold {
        Check::Divergent(Some(Evidence::LastLogin {
            last_login: raw.to_string(),
        }))
    } else {
        Check::Clear
    }
}

pub fn sod_violation(ctx: &AccountContext<'_>) -> Check {
    match crate::sod::first_violation(ctx.account, ctx.identity, ctx.rules) {
        Some(rule) => Check::Divergent(Some(Evidence::Rule {
            rule_id: rule.rule_id.clone(),
        })),
        None => Check::Clear,
    }
}

// ---------------------------------------------------------------------------
// Identity detector
// ---------------------------------------------------------------------------

/// True when an active identity has no account in an application system.
pub fn access_not_granted(index: &Index<'_>, identity: &Identity, system: &System) -> bool {
    !system.is_hr()
        && identity.employment_status == Status::Active
        && !index.has_account_in(&identity.identity_key, &system.system_id)
}

/// One ACCESS_NOT_GRANTED occurrence per application system the identity
/// is missing from.
pub fn detect_identity(
    index: &Index<'_>,
    identity: &Identity,
    systems: &[System],
) -> Vec<DivergenceOccurrence> {
    systems
        .iter()
        .filter(|s| access_not_granted(index, identity, s))
        .map(|s| DivergenceOccurrence {
            subject: SubjectRef::Identity {
                identity_key: identity.identity_key.clone(),
            },
            code: DivergenceCode::AccessNotGranted,
            target_system: Some(s.system_id.clone()),
            evidence: None,
            excepted: false,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Data quality
// ---------------------------------------------------------------------------

/// Input problems that degrade a check to "not divergent". Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataQualityWarning {
    UnparseableLastLogin { subject: SubjectRef, value: String },
    MissingOnOneSide { subject: SubjectRef, field: &'static str },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnparseableLastLogin { subject, value } => {
                write!(f, "{}: unparseable last_login '{value}'", subject_label(subject))
            }
            Self::MissingOnOneSide { subject, field } => {
                write!(f, "{}: {field} present on only one side", subject_label(subject))
            }
        }
    }
}

fn subject_label(subject: &SubjectRef) -> String {
    match subject {
        SubjectRef::Account { system_id, account_key } => format!("account {system_id}/{account_key}"),
        SubjectRef::Identity { identity_key } => format!("identity {identity_key}"),
    }
}

/// Data-quality warnings for one linked or unlinked account.
pub fn data_quality(ctx: &AccountContext<'_>) -> Vec<DataQualityWarning> {
    let account = ctx.account;
    let mut warnings = Vec::new();

    if let Some(raw) = present(account.attributes.last_login.as_deref()) {
        if parse_timestamp(raw).is_none() {
            warnings.push(DataQualityWarning::UnparseableLastLogin {
                subject: account.subject(),
                value: raw.to_string(),
            });
        }
    }

    if let Some(identity) = ctx.identity {
        let hr = present(identity.national_id.as_deref()).is_some();
        let app = present(account.account_national_id.as_deref()).is_some();
        if hr != app {
            warnings.push(DataQualityWarning::MissingOnOneSide {
                subject: account.subject(),
                field: "national_id",
            });
        }
    }

    warnings
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Parse a last-login style timestamp: RFC 3339, naive date-time, or date.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn holds_admin(account: &Account, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    account
        .resource_assignments
        .iter()
        .any(|r| r.display_name.to_lowercase().contains(&marker))
}

/// Divergent only when both sides carry a value and the normalized forms differ.
fn compare_present(hr: Option<&str>, account: Option<&str>, normalize: fn(&str) -> String) -> Check {
    match (present(hr), present(account)) {
        (Some(h), Some(a)) if normalize(h) != normalize(a) => Check::Divergent(Some(Evidence::Values {
            hr: h.to_string(),
            account: a.to_string(),
        })),
        _ => Check::Clear,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
