//! Segregation-of-Duties rule evaluation.
//!
//! The check is existential: the first satisfied rule decides, so rule order
//! never changes the boolean outcome.

use std::collections::HashSet;

use crate::error::ReconError;
use crate::model::{
    Account, AttrOperator, Identity, IdentityAttribute, Resource, SodRule, SodRuleKind, Status, System,
};

impl AttrOperator {
    /// Case-insensitive comparison of an identity attribute against the
    /// rule's value.
    pub fn matches(&self, actual: &str, expected: &str) -> bool {
        let actual = actual.to_lowercase();
        let expected = expected.to_lowercase();
        match self {
            Self::Equals => actual == expected,
            Self::NotEquals => actual != expected,
            Self::Contains => actual.contains(&expected),
            Self::StartsWith => actual.starts_with(&expected),
            Self::EndsWith => actual.ends_with(&expected),
        }
    }
}

/// Global rules plus rules scoped to `system_id`.
pub fn applicable_rules<'a>(rules: &'a [SodRule], system_id: &str) -> Vec<&'a SodRule> {
    rules
        .iter()
        .filter(|r| r.system_id.as_deref().map_or(true, |s| s == system_id))
        .collect()
}

pub fn rule_violated(rule: &SodRule, account: &Account, identity: Option<&Identity>) -> bool {
    match &rule.kind {
        SodRuleKind::RoleXRole { resource_a, resource_b } => {
            account.holds(resource_a) && account.holds(resource_b)
        }
        SodRuleKind::AttrXRole { attribute, operator, value, resource_b } => {
            let Some(identity) = identity else {
                return false;
            };
            // Status values compare in canonical form so `Inativo` matches `inactive`.
            let expected = match attribute {
                IdentityAttribute::EmploymentStatus => {
                    value.parse::<Status>().map_or(value.as_str(), |s| s.as_str())
                }
                _ => value.as_str(),
            };
            account.holds(resource_b)
                && attribute
                    .read(identity)
                    .is_some_and(|actual| operator.matches(actual, expected))
        }
    }
}

/// The first applicable rule the account violates.
pub fn first_violation<'r>(
    account: &Account,
    identity: Option<&Identity>,
    rules: &[&'r SodRule],
) -> Option<&'r SodRule> {
    rules
        .iter()
        .copied()
        .find(|rule| rule_violated(rule, account, identity))
}

/// Boolean contract: does the account violate at least one rule?
pub fn has_violation(account: &Account, identity: Option<&Identity>, rules: &[&SodRule]) -> bool {
    first_violation(account, identity, rules).is_some()
}

/// Reject rules that reference a resource absent from the whole catalog or
/// a system that does not exist. A rule scoped to one system that names a
/// resource from another system is kept; it simply never fires.
pub fn validate_rules(
    rules: &[SodRule],
    resources: &[Resource],
    systems: &[System],
) -> Result<(), ReconError> {
    let catalog: HashSet<(&str, &str)> = resources
        .iter()
        .map(|r| (r.system_id.as_str(), r.resource_key.as_str()))
        .collect();
    let known_keys: HashSet<&str> = resources.iter().map(|r| r.resource_key.as_str()).collect();

    for rule in rules {
        if let Some(system_id) = rule.system_id.as_deref() {
            if !systems.iter().any(|s| s.system_id == system_id) {
                return Err(ReconError::UnknownSystem(format!(
                    "sod rule '{}' is scoped to '{system_id}'",
                    rule.rule_id
                )));
            }
        }
        for key in rule.resource_keys() {
            if !known_keys.contains(key) {
                return Err(ReconError::UnknownResource {
                    rule_id: rule.rule_id.clone(),
                    resource_key: key.to_string(),
                });
            }
            if let Some(system_id) = rule.system_id.as_deref() {
                if !catalog.contains(&(system_id, key)) {
                    log::warn!(
                        "sod rule '{}': resource '{key}' is not in the catalog of '{system_id}'; rule can never fire",
                        rule.rule_id
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountAttributes, SystemKind};

    fn resource(key: &str) -> Resource {
        Resource {
            resource_key: key.into(),
            system_id: "erp".into(),
            display_name: format!("Profile {key}"),
        }
    }

    fn account_with(keys: &[&str]) -> Account {
        Account {
            account_key: "acc".into(),
            system_id: "erp".into(),
            linked_identity: Some("u1".into()),
            account_name: None,
            account_email: None,
            account_national_id: None,
            account_status: Status::Active,
            resource_assignments: keys.iter().map(|k| resource(k)).collect(),
            attributes: AccountAttributes::default(),
            created_at: None,
        }
    }

    fn contractor() -> Identity {
        Identity {
            identity_key: "u1".into(),
            full_name: Some("Ana Lima".into()),
            email: None,
            national_id: None,
            employment_status: Status::Active,
            user_type: Some("Contractor".into()),
            created_at: None,
        }
    }

    fn role_x_role(id: &str, system: Option<&str>, a: &str, b: &str) -> SodRule {
        SodRule {
            rule_id: id.into(),
            system_id: system.map(String::from),
            kind: SodRuleKind::RoleXRole { resource_a: a.into(), resource_b: b.into() },
        }
    }

    fn attr_rule(operator: AttrOperator, value: &str) -> SodRule {
        SodRule {
            rule_id: "attr".into(),
            system_id: None,
            kind: SodRuleKind::AttrXRole {
                attribute: IdentityAttribute::UserType,
                operator,
                value: value.into(),
                resource_b: "R2".into(),
            },
        }
    }

    #[test]
    fn role_x_role_flips_when_second_resource_granted() {
        let rule = role_x_role("r", None, "R1", "R2");
        let rules = [&rule];
        assert!(!has_violation(&account_with(&["R1"]), None, &rules));
        assert!(has_violation(&account_with(&["R1", "R2"]), None, &rules));
    }

    #[test]
    fn unrelated_resources_never_clear_a_violation() {
        let rule = role_x_role("r", None, "R1", "R2");
        let rules = [&rule];
        assert!(has_violation(&account_with(&["R0", "R1", "R5", "R2", "R7"]), None, &rules));
    }

    #[test]
    fn operators_are_case_insensitive() {
        assert!(AttrOperator::Equals.matches("Contractor", "CONTRACTOR"));
        assert!(AttrOperator::NotEquals.matches("Employee", "contractor"));
        assert!(AttrOperator::Contains.matches("External Contractor", "contract"));
        assert!(AttrOperator::StartsWith.matches("Contractor", "CON"));
        assert!(AttrOperator::EndsWith.matches("Contractor", "TOR"));
        assert!(!AttrOperator::StartsWith.matches("Contractor", "tor"));
    }

    #[test]
    fn attr_x_role_needs_identity_and_resource() {
        let rule = attr_rule(AttrOperator::Equals, "contractor");
        let rules = [&rule];
        let identity = contractor();

        assert!(has_violation(&account_with(&["R2"]), Some(&identity), &rules));
        assert!(!has_violation(&account_with(&["R1"]), Some(&identity), &rules));
        assert!(!has_violation(&account_with(&["R2"]), None, &rules));
    }

    #[test]
    fn status_rule_accepts_source_spelling() {
        let rule = SodRule {
            rule_id: "inactive-approver".into(),
            system_id: None,
            kind: SodRuleKind::AttrXRole {
                attribute: IdentityAttribute::EmploymentStatus,
                operator: AttrOperator::Equals,
                value: "Inativo".into(),
                resource_b: "R2".into(),
            },
        };
        let rules = [&rule];
        let mut identity = contractor();
        identity.employment_status = "Inativo".parse().unwrap();
        assert!(has_violation(&account_with(&["R2"]), Some(&identity), &rules));

        identity.employment_status = Status::Active;
        assert!(!has_violation(&account_with(&["R2"]), Some(&identity), &rules));
    }

    #[test]
    fn attr_x_role_with_missing_attribute_is_clear() {
        let rule = attr_rule(AttrOperator::NotEquals, "employee");
        let rules = [&rule];
        let mut identity = contractor();
        identity.user_type = None;
        assert!(!has_violation(&account_with(&["R2"]), Some(&identity), &rules));
    }

    #[test]
    fn applicable_rules_are_global_plus_system_scoped() {
        let rules = vec![
            role_x_role("global", None, "R1", "R2"),
            role_x_role("erp", Some("erp"), "R1", "R3"),
            role_x_role("crm", Some("crm"), "R1", "R4"),
        ];
        let ids: Vec<_> = applicable_rules(&rules, "erp").iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["global", "erp"]);
    }

    #[test]
    fn first_violation_names_the_fired_rule() {
        let a = role_x_role("a", None, "R1", "R9");
        let b = role_x_role("b", None, "R1", "R2");
        let rules = [&a, &b];
        let fired = first_violation(&account_with(&["R1", "R2"]), None, &rules).unwrap();
        assert_eq!(fired.rule_id, "b");
    }

    #[test]
    fn validation_rejects_unknown_resource() {
        let systems = vec![System { system_id: "erp".into(), display_name: "ERP".into(), kind: SystemKind::Application }];
        let resources = vec![resource("R1"), resource("R2")];

        assert!(validate_rules(&[role_x_role("ok", Some("erp"), "R1", "R2")], &resources, &systems).is_ok());

        let err = validate_rules(&[role_x_role("bad", None, "R1", "R404")], &resources, &systems).unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("R404"));

        let err = validate_rules(&[role_x_role("bad", Some("crm"), "R1", "R2")], &resources, &systems).unwrap_err();
        assert!(matches!(err, ReconError::UnknownSystem(_)));
    }
}
