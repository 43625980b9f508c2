use std::fmt;

#[derive(Debug)]
pub enum ReconError {
    /// Two identities in one snapshot share an `identity_key`.
    DuplicateIdentity(String),
    /// An SoD rule references a resource missing from the tenant catalog.
    UnknownResource { rule_id: String, resource_key: String },
    /// A record or rule references a system that does not exist.
    UnknownSystem(String),
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (missing hr system, incomplete rule, etc.).
    ConfigValidation(String),
    /// Missing required column in input data.
    MissingColumn { file: String, column: String },
    /// A field value could not be interpreted.
    InvalidValue { file: String, record: String, message: String },
    /// The ingestion collaborator failed to deliver a record set.
    Source(String),
    /// IO error (file read, etc.).
    Io(String),
}

impl ReconError {
    /// True for errors caused by the submitted records or rules rather than
    /// by configuration or data loading.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateIdentity(_) | Self::UnknownResource { .. } | Self::UnknownSystem(_)
        )
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIdentity(key) => write!(f, "duplicate identity_key '{key}'"),
            Self::UnknownResource { rule_id, resource_key } => {
                write!(f, "sod rule '{rule_id}': unknown resource '{resource_key}'")
            }
            Self::UnknownSystem(id) => write!(f, "unknown system: {id}"),
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingColumn { file, column } => {
                write!(f, "{file}: missing column '{column}'")
            }
            Self::InvalidValue { file, record, message } => {
                write!(f, "{file}, record '{record}': {message}")
            }
            Self::Source(msg) => write!(f, "cannot load data: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
