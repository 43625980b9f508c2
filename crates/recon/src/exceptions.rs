//! Exception overlay: operator acknowledgments and the three visibility modes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{DivergenceCode, DivergenceOccurrence, Exception, SubjectRef};

/// Which divergent subjects a report shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    /// Divergent and not acknowledged.
    #[default]
    DivergentOnly,
    /// Divergent and acknowledged by an exception.
    ExceptionsOnly,
    /// Divergent, regardless of exceptions.
    All,
}

impl VisibilityMode {
    /// Non-divergent subjects are never included.
    pub fn includes(&self, is_divergent: bool, is_excepted: bool) -> bool {
        if !is_divergent {
            return false;
        }
        match self {
            Self::DivergentOnly => !is_excepted,
            Self::ExceptionsOnly => is_excepted,
            Self::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DivergentOnly => "divergent_only",
            Self::ExceptionsOnly => "exceptions_only",
            Self::All => "all",
        }
    }
}

impl fmt::Display for VisibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "divergent_only" | "divergent" => Ok(Self::DivergentOnly),
            "exceptions_only" | "exceptions" => Ok(Self::ExceptionsOnly),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown visibility '{other}' (expected divergent_only, exceptions_only or all)"
            )),
        }
    }
}

/// Exceptions of one tenant, keyed by their exact composite key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionSet {
    entries: BTreeSet<Exception>,
}

impl ExceptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exception> {
        self.entries.iter()
    }

    /// Insert an exception. Returns false when the key already exists.
    pub fn upsert(&mut self, exception: Exception) -> bool {
        self.entries.insert(exception)
    }

    /// Returns false when no exception had this key.
    pub fn remove(&mut self, exception: &Exception) -> bool {
        self.entries.remove(exception)
    }

    pub fn contains(&self, exception: &Exception) -> bool {
        self.entries.contains(exception)
    }

    /// Exact-key lookup for an account-level occurrence.
    pub fn is_account_excepted(&self, system_id: &str, account_key: &str, code: DivergenceCode) -> bool {
        self.entries.contains(&Exception::Account {
            system_id: system_id.to_string(),
            account_key: account_key.to_string(),
            code,
        })
    }

    pub fn is_access_excepted(&self, identity_key: &str, target_system: &str) -> bool {
        self.entries.contains(&Exception::AccessNotGranted {
            identity_key: identity_key.to_string(),
            target_system: target_system.to_string(),
        })
    }

    /// The exception key an occurrence would be suppressed by, if any shape fits.
    pub fn key_for(occurrence: &DivergenceOccurrence) -> Option<Exception> {
        match (&occurrence.subject, occurrence.code) {
            (SubjectRef::Identity { identity_key }, DivergenceCode::AccessNotGranted) => {
                occurrence
                    .target_system
                    .as_ref()
                    .map(|target| Exception::AccessNotGranted {
                        identity_key: identity_key.clone(),
                        target_system: target.clone(),
                    })
            }
            (SubjectRef::Account { system_id, account_key }, code) if code.is_account_level() => {
                Some(Exception::Account {
                    system_id: system_id.clone(),
                    account_key: account_key.clone(),
                    code,
                })
            }
            _ => None,
        }
    }

    pub fn is_excepted(&self, occurrence: &DivergenceOccurrence) -> bool {
        Self::key_for(occurrence).is_some_and(|key| self.entries.contains(&key))
    }

    /// Set the `excepted` flag on each occurrence.
    pub fn mark(&self, occurrences: &mut [DivergenceOccurrence]) {
        for occurrence in occurrences {
            occurrence.excepted = self.is_excepted(occurrence);
        }
    }
}

impl FromIterator<Exception> for ExceptionSet {
    fn from_iter<I: IntoIterator<Item = Exception>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_occurrence(code: DivergenceCode) -> DivergenceOccurrence {
        DivergenceOccurrence {
            subject: SubjectRef::Account {
                system_id: "erp".into(),
                account_key: "msouza".into(),
            },
            code,
            target_system: None,
            evidence: None,
            excepted: false,
        }
    }

    #[test]
    fn modes_partition_divergent_subjects() {
        for excepted in [false, true] {
            let only = VisibilityMode::DivergentOnly.includes(true, excepted);
            let exc = VisibilityMode::ExceptionsOnly.includes(true, excepted);
            assert!(only ^ exc, "exactly one narrow mode includes the subject");
            assert!(VisibilityMode::All.includes(true, excepted));
        }
    }

    #[test]
    fn non_divergent_is_never_included() {
        for mode in [VisibilityMode::DivergentOnly, VisibilityMode::ExceptionsOnly, VisibilityMode::All] {
            assert!(!mode.includes(false, false));
            assert!(!mode.includes(false, true));
        }
    }

    #[test]
    fn parse_visibility() {
        assert_eq!("exceptions-only".parse::<VisibilityMode>().unwrap(), VisibilityMode::ExceptionsOnly);
        assert_eq!("ALL".parse::<VisibilityMode>().unwrap(), VisibilityMode::All);
        assert_eq!(VisibilityMode::default(), VisibilityMode::DivergentOnly);
        assert!("hidden".parse::<VisibilityMode>().is_err());
    }

    #[test]
    fn exception_suppresses_only_its_own_code() {
        let set: ExceptionSet = [Exception::Account {
            system_id: "erp".into(),
            account_key: "msouza".into(),
            code: DivergenceCode::CpfMismatch,
        }]
        .into_iter()
        .collect();

        let mut occurrences = vec![
            account_occurrence(DivergenceCode::CpfMismatch),
            account_occurrence(DivergenceCode::ZombieAccount),
        ];
        set.mark(&mut occurrences);
        assert!(occurrences[0].excepted);
        assert!(!occurrences[1].excepted);
    }

    #[test]
    fn same_account_key_in_another_system_is_not_excepted() {
        let set: ExceptionSet = [Exception::Account {
            system_id: "crm".into(),
            account_key: "msouza".into(),
            code: DivergenceCode::CpfMismatch,
        }]
        .into_iter()
        .collect();
        assert!(!set.is_excepted(&account_occurrence(DivergenceCode::CpfMismatch)));
    }

    #[test]
    fn access_not_granted_is_keyed_by_target_system() {
        let mut set = ExceptionSet::new();
        assert!(set.upsert(Exception::AccessNotGranted {
            identity_key: "u1".into(),
            target_system: "crm".into(),
        }));
        assert!(set.is_access_excepted("u1", "crm"));
        assert!(!set.is_access_excepted("u1", "erp"));
    }

    #[test]
    fn upsert_is_idempotent_and_remove_reports_absence() {
        let exception = Exception::Account {
            system_id: "erp".into(),
            account_key: "a1".into(),
            code: DivergenceCode::OrphanAccount,
        };
        let mut set = ExceptionSet::new();
        assert!(set.upsert(exception.clone()));
        assert!(!set.upsert(exception.clone()));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&exception));
        assert!(!set.remove(&exception));
        assert!(set.is_empty());
    }

    #[test]
    fn serializes_as_a_plain_list() {
        let set: ExceptionSet = [Exception::AccessNotGranted {
            identity_key: "u1".into(),
            target_system: "crm".into(),
        }]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"[{"scope":"access_not_granted","identity_key":"u1","target_system":"crm"}]"#
        );
        let back: ExceptionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
