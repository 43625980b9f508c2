//! CSV/JSON ingestion: turns the files named by a [`ReconConfig`] into
//! snapshot record sets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::ReconConfig;
use crate::detect::parse_timestamp;
use crate::engine::SnapshotSource;
use crate::error::ReconError;
use crate::model::{
    Account, AccountAttributes, Exception, Identity, Resource, SodRule, Status, System, SystemKind,
};

// ---------------------------------------------------------------------------
// CSV helpers
// ---------------------------------------------------------------------------

struct Table {
    file: String,
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl Table {
    fn parse(file: &str, csv_data: &str) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(csv_data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ReconError::Io(format!("{file}: {e}")))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ReconError::Io(format!("{file}: {e}")))?;

        Ok(Self {
            file: file.to_string(),
            headers,
            records,
        })
    }

    fn required(&self, name: &str) -> Result<usize, ReconError> {
        self.optional(name).ok_or_else(|| ReconError::MissingColumn {
            file: self.file.clone(),
            column: name.into(),
        })
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn invalid(&self, record: &str, message: impl Into<String>) -> ReconError {
        ReconError::InvalidValue {
            file: self.file.clone(),
            record: record.to_string(),
            message: message.into(),
        }
    }
}

fn cell(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn created_at(table: &Table, record: &csv::StringRecord, idx: Option<usize>, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = cell(record, idx)?;
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        log::warn!("{}, record '{key}': unparseable created_at '{raw}'", table.file);
    }
    parsed
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

pub fn load_identities(file: &str, csv_data: &str) -> Result<Vec<Identity>, ReconError> {
    let table = Table::parse(file, csv_data)?;
    let key_idx = table.required("identity_key")?;
    let status_idx = table.required("status")?;
    let name_idx = table.optional("full_name");
    let email_idx = table.optional("email");
    let national_id_idx = table.optional("national_id");
    let user_type_idx = table.optional("user_type");
    let created_idx = table.optional("created_at");

    let mut identities = Vec::with_capacity(table.records.len());
    for record in &table.records {
        let Some(key) = cell(record, Some(key_idx)) else {
            log::warn!("{}: skipping record with empty identity_key", table.file);
            continue;
        };
        let status: Status = record
            .get(status_idx)
            .unwrap_or("")
            .parse()
            .map_err(|e: String| table.invalid(&key, e))?;

        identities.push(Identity {
            full_name: cell(record, name_idx),
            email: cell(record, email_idx),
            national_id: cell(record, national_id_idx),
            employment_status: status,
            user_type: cell(record, user_type_idx),
            created_at: created_at(&table, record, created_idx, &key),
            identity_key: key,
        });
    }
    Ok(identities)
}

pub fn load_resources(file: &str, csv_data: &str, system_id: &str) -> Result<Vec<Resource>, ReconError> {
    let table = Table::parse(file, csv_data)?;
    let key_idx = table.required("resource_key")?;
    let name_idx = table.optional("display_name");

    Ok(table
        .records
        .iter()
        .filter_map(|record| {
            let key = cell(record, Some(key_idx))?;
            Some(Resource {
                display_name: cell(record, name_idx).unwrap_or_else(|| key.clone()),
                resource_key: key,
                system_id: system_id.to_string(),
            })
        })
        .collect())
}

/// Load one system's accounts. `resources` lists are resolved against
/// `catalog`; an unknown key is an error.
pub fn load_accounts(
    file: &str,
    csv_data: &str,
    system_id: &str,
    catalog: &[Resource],
) -> Result<Vec<Account>, ReconError> {
    let table = Table::parse(file, csv_data)?;
    let key_idx = table.required("account_key")?;
    let status_idx = table.required("status")?;
    let identity_idx = table.optional("identity_key");
    let name_idx = table.optional("name");
    let email_idx = table.optional("email");
    let national_id_idx = table.optional("national_id");
    let resources_idx = table.optional("resources");
    let last_login_idx = table.optional("last_login");
    let user_type_idx = table.optional("user_type");
    let created_idx = table.optional("created_at");

    let by_key: HashMap<&str, &Resource> = catalog
        .iter()
        .filter(|r| r.system_id == system_id)
        .map(|r| (r.resource_key.as_str(), r))
        .collect();

    let mut accounts = Vec::with_capacity(table.records.len());
    for record in &table.records {
        let Some(key) = cell(record, Some(key_idx)) else {
            log::warn!("{}: skipping record with empty account_key", table.file);
            continue;
        };
        let status: Status = record
            .get(status_idx)
            .unwrap_or("")
            .parse()
            .map_err(|e: String| table.invalid(&key, e))?;

        let mut resource_assignments = Vec::new();
        if let Some(list) = cell(record, resources_idx) {
            for resource_key in list.split(';').map(str::trim).filter(|k| !k.is_empty()) {
                let resource = by_key.get(resource_key).ok_or_else(|| {
                    table.invalid(&key, format!("unknown resource '{resource_key}' for system '{system_id}'"))
                })?;
                resource_assignments.push((*resource).clone());
            }
        }

        accounts.push(Account {
            system_id: system_id.to_string(),
            linked_identity: cell(record, identity_idx),
            account_name: cell(record, name_idx),
            account_email: cell(record, email_idx),
            account_national_id: cell(record, national_id_idx),
            account_status: status,
            resource_assignments,
            attributes: AccountAttributes {
                last_login: cell(record, last_login_idx),
                user_type: cell(record, user_type_idx),
            },
            created_at: created_at(&table, record, created_idx, &key),
            account_key: key,
        });
    }
    Ok(accounts)
}

/// Exceptions file: a JSON list of exception keys.
pub fn load_exceptions(file: &str, json: &str) -> Result<Vec<Exception>, ReconError> {
    serde_json::from_str(json).map_err(|e| ReconError::InvalidValue {
        file: file.to_string(),
        record: format!("line {}", e.line()),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// CsvSource
// ---------------------------------------------------------------------------

/// Snapshot source backed by the files a run config names. Paths resolve
/// against `base_dir`, normally the config file's directory.
pub struct CsvSource {
    config: ReconConfig,
    base_dir: PathBuf,
}

impl CsvSource {
    pub fn new(config: ReconConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    /// Read and validate the config at `path`.
    pub fn open(path: &Path) -> Result<Self, ReconError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))?;
        let config = ReconConfig::from_toml(&text)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(config, base_dir))
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.base_dir.join(relative)
    }

    pub fn exceptions_path(&self) -> Option<PathBuf> {
        self.config.exceptions.as_deref().map(|p| self.resolve(p))
    }

    fn read(&self, relative: &str) -> Result<String, ReconError> {
        let path = self.resolve(relative);
        std::fs::read_to_string(&path).map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))
    }

    fn check_tenant(&self, tenant: &str) -> Result<(), ReconError> {
        if tenant == self.config.tenant {
            Ok(())
        } else {
            Err(ReconError::Source(format!(
                "tenant '{tenant}' is not served by this config (tenant '{}')",
                self.config.tenant
            )))
        }
    }

    fn catalog(&self, system_id: &str) -> Result<Vec<Resource>, ReconError> {
        match self.config.systems.get(system_id).and_then(|s| s.resources.as_deref()) {
            Some(file) => load_resources(file, &self.read(file)?, system_id),
            None => Ok(Vec::new()),
        }
    }
}

impl SnapshotSource for CsvSource {
    fn identities(&self, tenant: &str) -> Result<Vec<Identity>, ReconError> {
        self.check_tenant(tenant)?;
        let file = &self.config.identities;
        load_identities(file, &self.read(file)?)
    }

    fn accounts(&self, tenant: &str, system_filter: Option<&str>) -> Result<Vec<Account>, ReconError> {
        self.check_tenant(tenant)?;
        let mut accounts = Vec::new();
        for (system_id, system) in &self.config.systems {
            if system.kind == SystemKind::Hr || system_filter.is_some_and(|f| f != system_id) {
                continue;
            }
            let Some(file) = system.accounts.as_deref() else {
                continue;
            };
            let catalog = self.catalog(system_id)?;
            accounts.extend(load_accounts(file, &self.read(file)?, system_id, &catalog)?);
        }
        Ok(accounts)
    }

    fn systems(&self, tenant: &str) -> Result<Vec<System>, ReconError> {
        self.check_tenant(tenant)?;
        Ok(self.config.systems())
    }

    fn resources(&self, tenant: &str) -> Result<Vec<Resource>, ReconError> {
        self.check_tenant(tenant)?;
        let mut resources = Vec::new();
        for system_id in self.config.systems.keys() {
            resources.extend(self.catalog(system_id)?);
        }
        Ok(resources)
    }

    fn sod_rules(&self, tenant: &str) -> Result<Vec<SodRule>, ReconError> {
        self.check_tenant(tenant)?;
        self.config.sod_rules()
    }

    /// A configured but not yet created exceptions file means no exceptions.
    fn exceptions(&self, tenant: &str) -> Result<Vec<Exception>, ReconError> {
        self.check_tenant(tenant)?;
        let Some(path) = self.exceptions_path() else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))?;
        load_exceptions(&path.display().to_string(), &text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
