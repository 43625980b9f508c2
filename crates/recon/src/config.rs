use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{AttrOperator, IdentityAttribute, SodRule, SodRuleKind, System, SystemKind};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// One reconciliation run: where the snapshot lives and which policies apply.
/// File paths are relative to the config file's directory.
#[derive(Debug, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    pub tenant: String,
    /// HR identities CSV.
    pub identities: String,
    /// JSON file holding operator exceptions. Optional; absent means none.
    #[serde(default)]
    pub exceptions: Option<String>,
    pub systems: BTreeMap<String, SystemConfig>,
    #[serde(default)]
    pub sod_rules: Vec<SodRuleConfig>,
    #[serde(default)]
    pub detection: DetectionSettings,
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: SystemKind,
    /// Accounts CSV. Required for application systems, forbidden for hr.
    #[serde(default)]
    pub accounts: Option<String>,
    /// Resource catalog CSV.
    #[serde(default)]
    pub resources: Option<String>,
}

fn default_kind() -> SystemKind {
    SystemKind::Application
}

// ---------------------------------------------------------------------------
// SoD rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKindName {
    RoleXRole,
    AttrXRole,
}

/// Flat TOML shape of a rule. Which fields are required depends on `kind`.
#[derive(Debug, Clone, Deserialize)]
pub struct SodRuleConfig {
    pub id: String,
    #[serde(default)]
    pub system: Option<String>,
    pub kind: RuleKindName,
    #[serde(default)]
    pub resource_a: Option<String>,
    #[serde(default)]
    pub resource_b: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub operator: Option<AttrOperator>,
    #[serde(default)]
    pub value: Option<String>,
}

impl SodRuleConfig {
    pub fn to_rule(&self) -> Result<SodRule, ReconError> {
        let require = |field: &Option<String>, name: &str| {
            field
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "sod rule '{}': '{name}' is required for kind {:?}",
                        self.id, self.kind
                    ))
                })
        };

        let kind = match self.kind {
            RuleKindName::RoleXRole => SodRuleKind::RoleXRole {
                resource_a: require(&self.resource_a, "resource_a")?,
                resource_b: require(&self.resource_b, "resource_b")?,
            },
            RuleKindName::AttrXRole => {
                let attribute: IdentityAttribute = require(&self.attribute, "attribute")?
                    .parse()
                    .map_err(|e: String| {
                        ReconError::ConfigValidation(format!("sod rule '{}': {e}", self.id))
                    })?;
                let operator = self.operator.ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "sod rule '{}': 'operator' is required for kind AttrXRole",
                        self.id
                    ))
                })?;
                SodRuleKind::AttrXRole {
                    attribute,
                    operator,
                    value: require(&self.value, "value")?,
                    resource_b: require(&self.resource_b, "resource_b")?,
                }
            }
        };

        Ok(SodRule {
            rule_id: self.id.clone(),
            system_id: self.system.clone(),
            kind,
        })
    }
}

// ---------------------------------------------------------------------------
// Detection settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DetectionSettings {
    /// An admin account is dormant when its last login is strictly older
    /// than this many days before the evaluation time.
    #[serde(default = "default_dormancy_days")]
    pub dormancy_days: u32,
    /// Case-insensitive substring marking a resource as administrative.
    #[serde(default = "default_admin_marker")]
    pub admin_marker: String,
}

fn default_dormancy_days() -> u32 {
    90
}

fn default_admin_marker() -> String {
    "admin".into()
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            dormancy_days: default_dormancy_days(),
            admin_marker: default_admin_marker(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let hr: Vec<&str> = self
            .systems
            .iter()
            .filter(|(_, s)| s.kind == SystemKind::Hr)
            .map(|(id, _)| id.as_str())
            .collect();
        if hr.len() != 1 {
            return Err(ReconError::ConfigValidation(format!(
                "exactly one hr system is required, found {}",
                hr.len()
            )));
        }

        for (id, system) in &self.systems {
            match (system.kind, &system.accounts) {
                (SystemKind::Hr, Some(_)) => {
                    return Err(ReconError::ConfigValidation(format!(
                        "system '{id}': the hr system holds identities, not accounts"
                    )));
                }
                (SystemKind::Application, None) => {
                    return Err(ReconError::ConfigValidation(format!(
                        "system '{id}': 'accounts' file is required"
                    )));
                }
                _ => {}
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.sod_rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "duplicate sod rule id '{}'",
                    rule.id
                )));
            }
            if let Some(system) = rule.system.as_deref() {
                if !self.systems.contains_key(system) {
                    return Err(ReconError::UnknownSystem(format!(
                        "sod rule '{}' is scoped to '{system}'",
                        rule.id
                    )));
                }
            }
            rule.to_rule()?;
        }

        if self.detection.dormancy_days == 0 {
            return Err(ReconError::ConfigValidation(
                "detection.dormancy_days must be greater than 0".into(),
            ));
        }
        if self.detection.admin_marker.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "detection.admin_marker must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Systems in id order, display name defaulting to the id.
    pub fn systems(&self) -> Vec<System> {
        self.systems
            .iter()
            .map(|(id, s)| System {
                system_id: id.clone(),
                display_name: s.display_name.clone().unwrap_or_else(|| id.clone()),
                kind: s.kind,
            })
            .collect()
    }

    pub fn sod_rules(&self) -> Result<Vec<SodRule>, ReconError> {
        self.sod_rules.iter().map(SodRuleConfig::to_rule).collect()
    }

    pub fn hr_system_id(&self) -> Option<&str> {
        self.systems
            .iter()
            .find(|(_, s)| s.kind == SystemKind::Hr)
            .map(|(id, _)| id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "Quarterly access review"
tenant = "acme"
identities = "hr.csv"
exceptions = "exceptions.json"

[systems.rh]
display_name = "RH"
kind = "hr"

[systems.erp]
display_name = "ERP"
accounts = "erp_accounts.csv"
resources = "erp_resources.csv"

[systems.crm]
accounts = "crm_accounts.csv"

[[sod_rules]]
id = "sod-ap"
system = "erp"
kind = "role_x_role"
resource_a = "AP_CLERK"
resource_b = "AP_APPROVER"

[[sod_rules]]
id = "sod-contractor"
kind = "attr_x_role"
attribute = "user_type"
operator = "equals"
value = "contractor"
resource_b = "AP_APPROVER"
"#;

    #[test]
    fn parse_valid() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        assert_eq!(config.name, "Quarterly access review");
        assert_eq!(config.tenant, "acme");
        assert_eq!(config.exceptions.as_deref(), Some("exceptions.json"));
        assert_eq!(config.hr_system_id(), Some("rh"));
        assert_eq!(config.detection, DetectionSettings::default());

        let systems = config.systems();
        let ids: Vec<_> = systems.iter().map(|s| s.system_id.as_str()).collect();
        assert_eq!(ids, vec!["crm", "erp", "rh"]);
        assert_eq!(systems[0].display_name, "crm");
        assert_eq!(systems[0].kind, SystemKind::Application);
    }

    #[test]
    fn rules_convert_to_typed_kinds() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        let rules = config.sod_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].system_id.as_deref(), Some("erp"));
        assert_eq!(
            rules[1].kind,
            SodRuleKind::AttrXRole {
                attribute: IdentityAttribute::UserType,
                operator: AttrOperator::Equals,
                value: "contractor".into(),
                resource_b: "AP_APPROVER".into(),
            }
        );
        assert!(rules[1].system_id.is_none());
    }

    #[test]
    fn parse_detection_overrides() {
        let input = format!(
            r#"{VALID}

[detection]
dormancy_days = 30
admin_marker = "root"
"#
        );
        let config = ReconConfig::from_toml(&input).unwrap();
        assert_eq!(config.detection.dormancy_days, 30);
        assert_eq!(config.detection.admin_marker, "root");
    }

    #[test]
    fn reject_zero_dormancy() {
        let input = format!(
            r#"{VALID}

[detection]
dormancy_days = 0
"#
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("dormancy_days"));
    }

    #[test]
    fn reject_missing_hr_system() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.erp]
accounts = "erp.csv"
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("exactly one hr system"));
    }

    #[test]
    fn reject_hr_system_with_accounts() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.rh]
kind = "hr"
accounts = "rh.csv"
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'rh'"));
    }

    #[test]
    fn reject_application_without_accounts() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.rh]
kind = "hr"

[systems.erp]
resources = "erp_resources.csv"
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'accounts'"));
    }

    #[test]
    fn reject_incomplete_rule() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.rh]
kind = "hr"

[[sod_rules]]
id = "half"
kind = "role_x_role"
resource_a = "R1"
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("resource_b"));
    }

    #[test]
    fn reject_rule_with_unknown_attribute() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.rh]
kind = "hr"

[[sod_rules]]
id = "attr"
kind = "attr_x_role"
attribute = "shoe_size"
operator = "equals"
value = "42"
resource_b = "R1"
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("shoe_size"));
    }

    #[test]
    fn reject_rule_scoped_to_unknown_system() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.rh]
kind = "hr"

[[sod_rules]]
id = "scoped"
system = "sap"
kind = "role_x_role"
resource_a = "R1"
resource_b = "R2"
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::UnknownSystem(_)));
    }

    #[test]
    fn reject_unknown_operator() {
        let input = r#"
name = "Bad"
tenant = "acme"
identities = "hr.csv"

[systems.rh]
kind = "hr"

[[sod_rules]]
id = "attr"
kind = "attr_x_role"
attribute = "user_type"
operator = "matches_regex"
value = "x"
resource_b = "R1"
"#;
        assert!(ReconConfig::from_toml(input).is_err());
    }
}
