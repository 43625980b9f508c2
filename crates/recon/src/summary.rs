use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::DetectionSettings;
use crate::engine::Evaluator;
use crate::error::ReconError;
use crate::model::{DivergenceCode, Snapshot, Status};

/// Tenant-wide counts over the whole snapshot, independent of any filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub identities: usize,
    pub active_identities: usize,
    pub inactive_identities: usize,
    pub accounts: usize,
    pub active_accounts: usize,
    pub inactive_accounts: usize,
    /// Occurrences not covered by an exception, per code.
    pub open: BTreeMap<DivergenceCode, usize>,
    /// Occurrences acknowledged by an exception, per code.
    pub excepted: BTreeMap<DivergenceCode, usize>,
    /// Open occurrences per system id (account-level by owning system,
    /// ACCESS_NOT_GRANTED by target system).
    pub open_by_system: BTreeMap<String, usize>,
    pub warnings: usize,
}

impl Summary {
    pub fn total_open(&self) -> usize {
        self.open.values().sum()
    }

    pub fn total_excepted(&self) -> usize {
        self.excepted.values().sum()
    }
}

pub fn compute_summary(
    snapshot: &Snapshot,
    settings: &DetectionSettings,
    now: DateTime<Utc>,
) -> Result<Summary, ReconError> {
    let ev = Evaluator::new(snapshot, settings, now)?;
    let mut summary = Summary::default();
    let mut warnings = Vec::new();

    for identity in &snapshot.identities {
        summary.identities += 1;
        match identity.employment_status {
            Status::Active => summary.active_identities += 1,
            Status::Inactive => summary.inactive_identities += 1,
        }

        for occurrence in ev.identity_occurrences(identity, None) {
            let target = occurrence.target_system.clone().unwrap_or_default();
            tally(&mut summary, occurrence.code, occurrence.excepted, target);
        }
    }

    for account in &snapshot.accounts {
        summary.accounts += 1;
        match account.account_status {
            Status::Active => summary.active_accounts += 1,
            Status::Inactive => summary.inactive_accounts += 1,
        }

        let identity = ev.index().linked_identity(account);
        for occurrence in ev.account_occurrences(account, identity, &mut warnings) {
            tally(&mut summary, occurrence.code, occurrence.excepted, account.system_id.clone());
        }
    }

    summary.warnings = warnings.len();
    Ok(summary)
}

fn tally(summary: &mut Summary, code: DivergenceCode, excepted: bool, system_id: String) {
    if excepted {
        *summary.excepted.entry(code).or_insert(0) += 1;
    } else {
        *summary.open.entry(code).or_insert(0) += 1;
        *summary.open_by_system.entry(system_id).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Account, AccountAttributes, Exception, Identity, System, SystemKind};
    use chrono::TimeZone;

    fn identity(key: &str, status: Status) -> Identity {
        Identity {
            identity_key: key.into(),
            full_name: None,
            email: None,
            national_id: None,
            employment_status: status,
            user_type: None,
            created_at: None,
        }
    }

    fn account(key: &str, link: Option<&str>) -> Account {
        Account {
            account_key: key.into(),
            system_id: "erp".into(),
            linked_identity: link.map(String::from),
            account_name: None,
            account_email: None,
            account_national_id: None,
            account_status: Status::Active,
            resource_assignments: vec![],
            attributes: AccountAttributes::default(),
            created_at: None,
        }
    }

    #[test]
    fn counts_open_and_excepted_per_code() {
        let snapshot = Snapshot {
            identities: vec![identity("u1", Status::Inactive), identity("u2", Status::Active)],
            accounts: vec![account("a1", Some("u1")), account("a2", None), account("a3", None)],
            systems: vec![
                System { system_id: "rh".into(), display_name: "RH".into(), kind: SystemKind::Hr },
                System { system_id: "erp".into(), display_name: "ERP".into(), kind: SystemKind::Application },
            ],
            exceptions: vec![Exception::Account {
                system_id: "erp".into(),
                account_key: "a3".into(),
                code: DivergenceCode::OrphanAccount,
            }],
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 6, 30, 0, 0, 0).unwrap();
        let summary = compute_summary(&snapshot, &DetectionSettings::default(), now).unwrap();

        assert_eq!(summary.identities, 2);
        assert_eq!(summary.active_identities, 1);
        assert_eq!(summary.accounts, 3);
        assert_eq!(summary.open[&DivergenceCode::ZombieAccount], 1);
        assert_eq!(summary.open[&DivergenceCode::OrphanAccount], 1);
        assert_eq!(summary.open[&DivergenceCode::AccessNotGranted], 1);
        assert_eq!(summary.excepted[&DivergenceCode::OrphanAccount], 1);
        assert_eq!(summary.total_open(), 3);
        assert_eq!(summary.total_excepted(), 1);
        assert_eq!(summary.open_by_system["erp"], 3);
    }
}
