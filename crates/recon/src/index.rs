use std::collections::{BTreeSet, HashMap};

use crate::error::ReconError;
use crate::model::{Account, Identity, Snapshot, System};

/// Lookup structures over one snapshot. Linkage between accounts and
/// identities is taken as resolved by ingestion; it is never re-derived.
pub struct Index<'a> {
    identities: HashMap<&'a str, &'a Identity>,
    accounts_by_identity: HashMap<&'a str, Vec<&'a Account>>,
    systems: HashMap<&'a str, &'a System>,
    unresolved_links: usize,
}

impl<'a> Index<'a> {
    /// Build the index. Fails on a duplicate `identity_key`.
    pub fn build(snapshot: &'a Snapshot) -> Result<Self, ReconError> {
        let mut identities = HashMap::with_capacity(snapshot.identities.len());
        for identity in &snapshot.identities {
            if identities
                .insert(identity.identity_key.as_str(), identity)
                .is_some()
            {
                return Err(ReconError::DuplicateIdentity(identity.identity_key.clone()));
            }
        }

        let systems: HashMap<&str, &System> = snapshot
            .systems
            .iter()
            .map(|s| (s.system_id.as_str(), s))
            .collect();

        let mut accounts_by_identity: HashMap<&str, Vec<&Account>> = HashMap::new();
        let mut unresolved_links = 0;
        for account in &snapshot.accounts {
            if !systems.contains_key(account.system_id.as_str()) {
                log::warn!(
                    "account '{}' belongs to unknown system '{}'",
                    account.account_key,
                    account.system_id
                );
            }
            let Some(key) = account.linked_identity.as_deref() else {
                continue;
            };
            match identities.get_key_value(key) {
                Some((&k, _)) => accounts_by_identity.entry(k).or_default().push(account),
                None => {
                    unresolved_links += 1;
                    log::warn!(
                        "account '{}/{}' links to unknown identity '{key}'; treated as unlinked",
                        account.system_id,
                        account.account_key
                    );
                }
            }
        }

        log::debug!(
            "index built: {} identities, {} accounts, {} systems",
            identities.len(),
            snapshot.accounts.len(),
            systems.len()
        );

        Ok(Self {
            identities,
            accounts_by_identity,
            systems,
            unresolved_links,
        })
    }

    pub fn identity(&self, identity_key: &str) -> Option<&'a Identity> {
        self.identities.get(identity_key).copied()
    }

    /// The identity an account is linked to, if the link resolves.
    pub fn linked_identity(&self, account: &Account) -> Option<&'a Identity> {
        account
            .linked_identity
            .as_deref()
            .and_then(|key| self.identity(key))
    }

    pub fn accounts_of(&self, identity_key: &str) -> &[&'a Account] {
        self.accounts_by_identity
            .get(identity_key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Systems in which the identity holds at least one account.
    pub fn systems_of(&self, identity_key: &str) -> BTreeSet<&'a str> {
        self.accounts_of(identity_key)
            .iter()
            .map(|a| a.system_id.as_str())
            .collect()
    }

    pub fn has_account_in(&self, identity_key: &str, system_id: &str) -> bool {
        self.accounts_of(identity_key)
            .iter()
            .any(|a| a.system_id == system_id)
    }

    pub fn system(&self, system_id: &str) -> Option<&'a System> {
        self.systems.get(system_id).copied()
    }

    /// Display name of a system, falling back to its id.
    pub fn system_name<'s>(&self, system_id: &'s str) -> &'s str
    where
        'a: 's,
    {
        self.system(system_id)
            .map(|s| s.display_name.as_str())
            .unwrap_or(system_id)
    }

    /// Accounts whose `linked_identity` named an identity absent from the snapshot.
    pub fn unresolved_links(&self) -> usize {
        self.unresolved_links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountAttributes, Status, SystemKind};

    fn identity(key: &str) -> Identity {
        Identity {
            identity_key: key.into(),
            full_name: Some(format!("Person {key}")),
            email: None,
            national_id: None,
            employment_status: Status::Active,
            user_type: None,
            created_at: None,
        }
    }

    fn account(key: &str, system: &str, link: Option<&str>) -> Account {
        Account {
            account_key: key.into(),
            system_id: system.into(),
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

    fn system(id: &str, kind: SystemKind) -> System {
        System {
            system_id: id.into(),
            display_name: id.to_uppercase(),
            kind,
        }
    }

    #[test]
    fn where_does_this_person_have_access() {
        let snapshot = Snapshot {
            identities: vec![identity("u1"), identity("u2")],
            accounts: vec![
                account("a1", "erp", Some("u1")),
                account("a2", "crm", Some("u1")),
                account("a3", "crm", None),
            ],
            systems: vec![
                system("rh", SystemKind::Hr),
                system("erp", SystemKind::Application),
                system("crm", SystemKind::Application),
            ],
            ..Default::default()
        };
        let index = Index::build(&snapshot).unwrap();

        let systems: Vec<_> = index.systems_of("u1").into_iter().collect();
        assert_eq!(systems, vec!["crm", "erp"]);
        assert!(index.systems_of("u2").is_empty());
        assert!(index.has_account_in("u1", "erp"));
        assert!(!index.has_account_in("u2", "erp"));
        assert_eq!(index.system_name("erp"), "ERP");
        assert_eq!(index.system_name("ghost"), "ghost");
    }

    #[test]
    fn duplicate_identity_key_is_an_error() {
        let snapshot = Snapshot {
            identities: vec![identity("u1"), identity("u1")],
            ..Default::default()
        };
        let err = Index::build(&snapshot).err().unwrap();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("'u1'"));
    }

    #[test]
    fn unresolved_link_is_treated_as_unlinked() {
        let snapshot = Snapshot {
            identities: vec![identity("u1")],
            accounts: vec![account("a1", "erp", Some("ghost"))],
            ..Default::default()
        };
        let index = Index::build(&snapshot).unwrap();
        assert!(index.linked_identity(&snapshot.accounts[0]).is_none());
        assert_eq!(index.unresolved_links(), 1);
    }
}
