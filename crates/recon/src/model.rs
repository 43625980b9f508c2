use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Employment status of an identity, or activation status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Inactive,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    /// Accepts the English values and the HR source's `Ativo`/`Inativo`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "ativo" => Ok(Self::Active),
            "inactive" | "inativo" => Ok(Self::Inactive),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// HR record of a real person. Source of truth for employment status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub identity_key: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    /// National id (CPF). Compared digits-only.
    pub national_id: Option<String>,
    pub employment_status: Status,
    pub user_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Entitlement, role or profile grantable to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_key: String,
    pub system_id: String,
    pub display_name: String,
}

/// The account attributes the engine reads, normalized by ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountAttributes {
    /// Raw last-login timestamp. Parsed at evaluation time; unparseable
    /// values never count as dormant.
    pub last_login: Option<String>,
    pub user_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Id local to the owning system.
    pub account_key: String,
    pub system_id: String,
    /// Identity key resolved by ingestion; `None` for unlinked accounts.
    pub linked_identity: Option<String>,
    pub account_name: Option<String>,
    pub account_email: Option<String>,
    pub account_national_id: Option<String>,
    pub account_status: Status,
    pub resource_assignments: Vec<Resource>,
    #[serde(default)]
    pub attributes: AccountAttributes,
    pub created_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn holds(&self, resource_key: &str) -> bool {
        self.resource_assignments
            .iter()
            .any(|r| r.resource_key == resource_key)
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef::Account {
            system_id: self.system_id.clone(),
            account_key: self.account_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    /// The HR pseudo-system. Holds identities, never accounts.
    Hr,
    Application,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub system_id: String,
    pub display_name: String,
    pub kind: SystemKind,
}

impl System {
    pub fn is_hr(&self) -> bool {
        self.kind == SystemKind::Hr
    }
}

// ---------------------------------------------------------------------------
// SoD rules
// ---------------------------------------------------------------------------

/// Identity fields an attribute rule may test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityAttribute {
    IdentityKey,
    FullName,
    Email,
    NationalId,
    EmploymentStatus,
    UserType,
}

impl IdentityAttribute {
    pub fn read<'a>(&self, identity: &'a Identity) -> Option<&'a str> {
        match self {
            Self::IdentityKey => Some(identity.identity_key.as_str()),
            Self::FullName => identity.full_name.as_deref(),
            Self::Email => identity.email.as_deref(),
            Self::NationalId => identity.national_id.as_deref(),
            Self::EmploymentStatus => Some(identity.employment_status.as_str()),
            Self::UserType => identity.user_type.as_deref(),
        }
    }
}

impl FromStr for IdentityAttribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "identity_key" => Ok(Self::IdentityKey),
            "full_name" => Ok(Self::FullName),
            "email" => Ok(Self::Email),
            "national_id" | "cpf" => Ok(Self::NationalId),
            "employment_status" | "status" => Ok(Self::EmploymentStatus),
            "user_type" => Ok(Self::UserType),
            other => Err(format!("unknown identity attribute '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SodRuleKind {
    /// Violated when an account holds both resources.
    RoleXRole {
        resource_a: String,
        resource_b: String,
    },
    /// Violated when the linked identity's attribute matches and the
    /// account holds `resource_b`.
    AttrXRole {
        attribute: IdentityAttribute,
        operator: AttrOperator,
        value: String,
        resource_b: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SodRule {
    pub rule_id: String,
    /// `None` = global rule.
    pub system_id: Option<String>,
    pub kind: SodRuleKind,
}

impl SodRule {
    /// Resource keys this rule references.
    pub fn resource_keys(&self) -> Vec<&str> {
        match &self.kind {
            SodRuleKind::RoleXRole { resource_a, resource_b } => {
                vec![resource_a.as_str(), resource_b.as_str()]
            }
            SodRuleKind::AttrXRole { resource_b, .. } => vec![resource_b.as_str()],
        }
    }
}

// ---------------------------------------------------------------------------
// Divergences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceCode {
    ZombieAccount,
    OrphanAccount,
    AccessNotGranted,
    CpfMismatch,
    NameMismatch,
    EmailMismatch,
    UsertypeMismatch,
    DormantAdmin,
    SodViolation,
}

impl DivergenceCode {
    pub const ALL: [DivergenceCode; 9] = [
        Self::ZombieAccount,
        Self::OrphanAccount,
        Self::AccessNotGranted,
        Self::CpfMismatch,
        Self::NameMismatch,
        Self::EmailMismatch,
        Self::UsertypeMismatch,
        Self::DormantAdmin,
        Self::SodViolation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZombieAccount => "ZOMBIE_ACCOUNT",
            Self::OrphanAccount => "ORPHAN_ACCOUNT",
            Self::AccessNotGranted => "ACCESS_NOT_GRANTED",
            Self::CpfMismatch => "CPF_MISMATCH",
            Self::NameMismatch => "NAME_MISMATCH",
            Self::EmailMismatch => "EMAIL_MISMATCH",
            Self::UsertypeMismatch => "USERTYPE_MISMATCH",
            Self::DormantAdmin => "DORMANT_ADMIN",
            Self::SodViolation => "SOD_VIOLATION",
        }
    }

    /// Every code except ACCESS_NOT_GRANTED is raised on an account.
    pub fn is_account_level(&self) -> bool {
        *self != Self::AccessNotGranted
    }
}

impl fmt::Display for DivergenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DivergenceCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| format!("unknown divergence code '{s}'"))
    }
}

/// The record a divergence is raised on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubjectRef {
    Account { system_id: String, account_key: String },
    Identity { identity_key: String },
}

/// Explanatory payload attached to an occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    /// The HR value and the account value that disagree.
    Values { hr: String, account: String },
    /// The SoD rule that fired first.
    Rule { rule_id: String },
    LastLogin { last_login: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergenceOccurrence {
    pub subject: SubjectRef,
    pub code: DivergenceCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    /// Set by the exception overlay.
    pub excepted: bool,
}

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

/// Operator acknowledgment of one divergence occurrence. The whole value is
/// the composite key: at most one exception exists per value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Exception {
    Account {
        system_id: String,
        account_key: String,
        code: DivergenceCode,
    },
    AccessNotGranted {
        identity_key: String,
        target_system: String,
    },
}

impl Exception {
    pub fn code(&self) -> DivergenceCode {
        match self {
            Self::Account { code, .. } => *code,
            Self::AccessNotGranted { .. } => DivergenceCode::AccessNotGranted,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account { system_id, account_key, code } => {
                write!(f, "{code} on account {system_id}/{account_key}")
            }
            Self::AccessNotGranted { identity_key, target_system } => {
                write!(f, "ACCESS_NOT_GRANTED for identity {identity_key} in {target_system}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time record sets for one tenant, as delivered by ingestion.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub identities: Vec<Identity>,
    pub accounts: Vec<Account>,
    pub systems: Vec<System>,
    pub resources: Vec<Resource>,
    pub sod_rules: Vec<SodRule>,
    pub exceptions: Vec<Exception>,
}
