use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::DetectionSettings;
use crate::detect::{self, AccountContext, DataQualityWarning};
use crate::error::ReconError;
use crate::exceptions::{ExceptionSet, VisibilityMode};
use crate::filter::{self, AccountRecord, DivergenceFilter, FilterRequest, IdentityRecord, ReportSubject};
use crate::index::Index;
use crate::model::{
    Account, DivergenceOccurrence, Exception, Identity, Resource, Snapshot, SodRule, System,
};
use crate::project::ProjectedRows;
use crate::sod;

// ---------------------------------------------------------------------------
// Ingestion interface
// ---------------------------------------------------------------------------

/// Record sets delivered by the ingestion collaborator. Accounts come with
/// resource assignments resolved and identity links precomputed.
pub trait SnapshotSource {
    fn identities(&self, tenant: &str) -> Result<Vec<Identity>, ReconError>;
    fn accounts(&self, tenant: &str, system_filter: Option<&str>) -> Result<Vec<Account>, ReconError>;
    fn systems(&self, tenant: &str) -> Result<Vec<System>, ReconError>;
    /// Resource catalog across all systems.
    fn resources(&self, tenant: &str) -> Result<Vec<Resource>, ReconError>;
    fn sod_rules(&self, tenant: &str) -> Result<Vec<SodRule>, ReconError>;
    fn exceptions(&self, tenant: &str) -> Result<Vec<Exception>, ReconError>;
}

fn fetch<T>(what: &str, result: Result<T, ReconError>) -> Result<T, ReconError> {
    result.map_err(|e| match e {
        ReconError::Source(_) => e,
        other => ReconError::Source(format!("{what}: {other}")),
    })
}

/// Pull one tenant's snapshot. Any fetch failure becomes `ReconError::Source`
/// so callers can tell "could not load" from "nothing matched".
pub fn load_snapshot(
    source: &dyn SnapshotSource,
    tenant: &str,
    system_filter: Option<&str>,
) -> Result<Snapshot, ReconError> {
    let snapshot = Snapshot {
        identities: fetch("identities", source.identities(tenant))?,
        accounts: fetch("accounts", source.accounts(tenant, system_filter))?,
        systems: fetch("systems", source.systems(tenant))?,
        resources: fetch("resources", source.resources(tenant))?,
        sod_rules: fetch("sod rules", source.sod_rules(tenant))?,
        exceptions: fetch("exceptions", source.exceptions(tenant))?,
    };
    log::debug!(
        "loaded snapshot for '{tenant}': {} identities, {} accounts, {} systems, {} rules, {} exceptions",
        snapshot.identities.len(),
        snapshot.accounts.len(),
        snapshot.systems.len(),
        snapshot.sod_rules.len(),
        snapshot.exceptions.len()
    );
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Per-request evaluation state over one immutable snapshot.
pub struct Evaluator<'a> {
    snapshot: &'a Snapshot,
    index: Index<'a>,
    rules_by_system: HashMap<&'a str, Vec<&'a SodRule>>,
    exceptions: ExceptionSet,
    settings: &'a DetectionSettings,
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    /// Index the snapshot and check the SoD rules against the catalog.
    pub fn new(
        snapshot: &'a Snapshot,
        settings: &'a DetectionSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, ReconError> {
        let index = Index::build(snapshot)?;
        sod::validate_rules(&snapshot.sod_rules, &snapshot.resources, &snapshot.systems)?;

        let mut rules_by_system: HashMap<&str, Vec<&SodRule>> = HashMap::new();
        for account in &snapshot.accounts {
            let system_id = account.system_id.as_str();
            rules_by_system
                .entry(system_id)
                .or_insert_with(|| sod::applicable_rules(&snapshot.sod_rules, system_id));
        }

        Ok(Self {
            snapshot,
            index,
            rules_by_system,
            exceptions: snapshot.exceptions.iter().cloned().collect(),
            settings,
            now,
        })
    }

    pub fn index(&self) -> &Index<'a> {
        &self.index
    }

    pub fn identities(&self) -> &'a [Identity] {
        &self.snapshot.identities
    }

    pub fn accounts(&self) -> &'a [Account] {
        &self.snapshot.accounts
    }

    pub fn systems(&self) -> &'a [System] {
        &self.snapshot.systems
    }

    pub fn exceptions(&self) -> &ExceptionSet {
        &self.exceptions
    }

    /// All account-level occurrences with the `excepted` flag set. Data-quality
    /// problems are logged and appended to `warnings`.
    pub fn account_occurrences(
        &self,
        account: &Account,
        identity: Option<&Identity>,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Vec<DivergenceOccurrence> {
        let rules = self
            .rules_by_system
            .get(account.system_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let ctx = AccountContext {
            account,
            identity,
            rules,
            settings: self.settings,
            now: self.now,
        };

        for warning in detect::data_quality(&ctx) {
            log::warn!("{warning}");
            warnings.push(warning);
        }

        let mut occurrences = detect::detect_account(&ctx);
        self.exceptions.mark(&mut occurrences);
        occurrences
    }

    /// ACCESS_NOT_GRANTED occurrences for one identity, optionally limited
    /// to a single target system.
    pub fn identity_occurrences(
        &self,
        identity: &Identity,
        system_filter: Option<&str>,
    ) -> Vec<DivergenceOccurrence> {
        let mut occurrences = detect::detect_identity(&self.index, identity, &self.snapshot.systems);
        if let Some(id) = system_filter {
            occurrences.retain(|o| o.target_system.as_deref() == Some(id));
        }
        self.exceptions.mark(&mut occurrences);
        occurrences
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subject", content = "records", rename_all = "snake_case")]
pub enum ReportRecords {
    Accounts(Vec<AccountRecord>),
    Identities(Vec<IdentityRecord>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub engine_version: String,
    pub evaluated_at: String,
    pub visibility: VisibilityMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence: Option<DivergenceFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
}

/// Annotated records of one report request, in report order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub meta: ReportMeta,
    #[serde(flatten)]
    pub records: ReportRecords,
    /// Data-quality warnings seen while evaluating. Never fatal.
    #[serde(skip)]
    pub warnings: Vec<DataQualityWarning>,
}

impl Report {
    pub fn subject(&self) -> ReportSubject {
        match self.records {
            ReportRecords::Accounts(_) => ReportSubject::Accounts,
            ReportRecords::Identities(_) => ReportSubject::Identities,
        }
    }

    pub fn len(&self) -> usize {
        match &self.records {
            ReportRecords::Accounts(r) => r.len(),
            ReportRecords::Identities(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to rows for tabular export.
    pub fn rows(&self) -> ProjectedRows {
        ProjectedRows::from_report(self)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Evaluate one report request against a snapshot. An empty result is `Ok`.
pub fn evaluate(
    snapshot: &Snapshot,
    request: &FilterRequest,
    settings: &DetectionSettings,
) -> Result<Report, ReconError> {
    let ev = Evaluator::new(snapshot, settings, request.now)?;
    let mut warnings = Vec::new();

    let records = match request.subject {
        ReportSubject::Accounts => {
            ReportRecords::Accounts(filter::accounts_report(&ev, request, &mut warnings))
        }
        ReportSubject::Identities => {
            ReportRecords::Identities(filter::identities_report(&ev, request, &mut warnings))
        }
    };

    if !warnings.is_empty() {
        log::info!("{} data-quality warnings during evaluation", warnings.len());
    }

    Ok(Report {
        meta: ReportMeta {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            evaluated_at: request.now.to_rfc3339(),
            visibility: request.visibility,
            divergence: request.effective_divergence(),
            system_id: request.system_id.clone(),
        },
        records,
        warnings,
    })
}

/// Fetch a snapshot through `source` and evaluate it. The account fetch is
/// narrowed to the requested system for account reports.
pub fn evaluate_source(
    source: &dyn SnapshotSource,
    tenant: &str,
    request: &FilterRequest,
    settings: &DetectionSettings,
) -> Result<Report, ReconError> {
    let system_filter = match request.subject {
        ReportSubject::Accounts => request.system_id.as_deref(),
        ReportSubject::Identities => None,
    };
    let snapshot = load_snapshot(source, tenant, system_filter)?;
    evaluate(&snapshot, request, settings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountAttributes, DivergenceCode, SodRuleKind, Status, SystemKind};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap()
    }

    fn identity(key: &str, name: &str, status: Status) -> Identity {
        Identity {
            identity_key: key.into(),
            full_name: Some(name.into()),
            email: None,
            national_id: None,
            employment_status: status,
            user_type: Some("Employee".into()),
            created_at: None,
        }
    }

    fn resource(system: &str, key: &str) -> Resource {
        Resource {
            resource_key: key.into(),
            system_id: system.into(),
            display_name: key.to_lowercase(),
        }
    }

    fn account(key: &str, system: &str, link: Option<&str>, resources: &[&str]) -> Account {
        Account {
            account_key: key.into(),
            system_id: system.into(),
            linked_identity: link.map(String::from),
            account_name: None,
            account_email: None,
            account_national_id: None,
            account_status: Status::Active,
            resource_assignments: resources.iter().map(|r| resource(system, r)).collect(),
            attributes: AccountAttributes::default(),
            created_at: None,
        }
    }

    fn system(id: &str, name: &str, kind: SystemKind) -> System {
        System {
            system_id: id.into(),
            display_name: name.into(),
            kind,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            identities: vec![
                identity("u1", "Bruno", Status::Inactive),
                identity("u2", "Ana", Status::Active),
            ],
            accounts: vec![
                account("bruno", "erp", Some("u1"), &["R1"]),
                account("ana", "crm", Some("u2"), &[]),
                account("ghost", "crm", None, &[]),
            ],
            systems: vec![
                system("rh", "RH", SystemKind::Hr),
                system("erp", "ERP", SystemKind::Application),
                system("crm", "CRM", SystemKind::Application),
            ],
            resources: vec![resource("erp", "R1"), resource("erp", "R2")],
            ..Default::default()
        }
    }

    #[test]
    fn accounts_report_sorted_by_system_name() {
        let snapshot = snapshot();
        let request = FilterRequest::new(ReportSubject::Accounts, now());
        let report = evaluate(&snapshot, &request, &DetectionSettings::default()).unwrap();

        let ReportRecords::Accounts(records) = &report.records else {
            panic!("expected account records");
        };
        let keys: Vec<_> = records.iter().map(|r| r.account.account_key.as_str()).collect();
        assert_eq!(keys, vec!["ana", "ghost", "bruno"]);
    }

    #[test]
    fn divergence_filter_keeps_matching_accounts() {
        let snapshot = snapshot();
        let mut request = FilterRequest::new(ReportSubject::Accounts, now());
        request.divergence = Some(DivergenceFilter::Code(DivergenceCode::ZombieAccount));
        let report = evaluate(&snapshot, &request, &DetectionSettings::default()).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report.meta.divergence, request.divergence);
    }

    #[test]
    fn empty_result_is_ok() {
        let snapshot = snapshot();
        let mut request = FilterRequest::new(ReportSubject::Accounts, now());
        request.divergence = Some(DivergenceFilter::Code(DivergenceCode::SodViolation));
        let report = evaluate(&snapshot, &request, &DetectionSettings::default()).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn rule_on_unknown_resource_aborts() {
        let mut snapshot = snapshot();
        snapshot.sod_rules.push(SodRule {
            rule_id: "bad".into(),
            system_id: None,
            kind: SodRuleKind::RoleXRole {
                resource_a: "R1".into(),
                resource_b: "NOPE".into(),
            },
        });
        let request = FilterRequest::new(ReportSubject::Accounts, now());
        let err = evaluate(&snapshot, &request, &DetectionSettings::default()).unwrap_err();
        assert!(err.is_input_error());
    }

    struct FailingSource;

    impl SnapshotSource for FailingSource {
        fn identities(&self, _: &str) -> Result<Vec<Identity>, ReconError> {
            Err(ReconError::Io("connection reset".into()))
        }
        fn accounts(&self, _: &str, _: Option<&str>) -> Result<Vec<Account>, ReconError> {
            Ok(vec![])
        }
        fn systems(&self, _: &str) -> Result<Vec<System>, ReconError> {
            Ok(vec![])
        }
        fn resources(&self, _: &str) -> Result<Vec<Resource>, ReconError> {
            Ok(vec![])
        }
        fn sod_rules(&self, _: &str) -> Result<Vec<SodRule>, ReconError> {
            Ok(vec![])
        }
        fn exceptions(&self, _: &str) -> Result<Vec<Exception>, ReconError> {
            Ok(vec![])
        }
    }

    #[test]
    fn fetch_failure_is_distinguishable_from_empty() {
        let request = FilterRequest::new(ReportSubject::Identities, now());
        let err = evaluate_source(&FailingSource, "acme", &request, &DetectionSettings::default())
            .unwrap_err();
        assert!(matches!(err, ReconError::Source(_)));
        assert!(err.to_string().contains("identities"));
    }

    #[test]
    fn report_serializes_with_subject_tag() {
        let snapshot = snapshot();
        let request = FilterRequest::new(ReportSubject::Identities, now());
        let report = evaluate(&snapshot, &request, &DetectionSettings::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["subject"], "identities");
        assert_eq!(json["records"].as_array().unwrap().len(), 2);
        assert_eq!(json["meta"]["visibility"], "divergent_only");
    }
}
