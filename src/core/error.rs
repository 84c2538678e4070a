use std::fmt;
use thiserror::Error;

/// One problem found while validating a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelViolation {
    /// Type the problem belongs to, if any.
    pub type_name: Option<String>,
    pub message: String,
}

impl ModelViolation {
    pub fn new(type_name: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A new type that overlaps with one or more removed types.
#[derive(Debug, Clone, PartialEq)]
pub struct RenameCandidate {
    pub new_type: String,
    /// `(old type, shared field ratio)` pairs above the configured threshold.
    pub candidates: Vec<(String, f64)>,
}

impl fmt::Display for RenameCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let olds = self
            .candidates
            .iter()
            .map(|(name, ratio)| format!("{} ({:.0}%)", name, ratio * 100.0))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "'{}' may be a rename of {}", self.new_type, olds)
    }
}

/// A field of one sampled row that did not survive the upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationFailure {
    pub type_name: String,
    pub key: crate::core::Value,
    pub field: String,
    pub expected: crate::core::Value,
    /// `None` when the row or the field is missing after the upgrade.
    pub actual: Option<crate::core::Value>,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{}[{}].{}: expected {}, found {}",
                self.type_name, self.key, self.field, self.expected, actual
            ),
            None => write!(
                f,
                "{}[{}].{}: expected {}, found nothing",
                self.type_name, self.key, self.field, self.expected
            ),
        }
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type '{0}' not found")]
    TypeNotFound(String),

    #[error("Part '{0}' not found")]
    PartNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Model validation failed:\n{}", join_lines(.0))]
    ModelValidation(Vec<ModelViolation>),

    #[error("Snapshot is inconsistent:\n{}", join_lines(.0))]
    SnapshotRead(Vec<String>),

    #[error("Ambiguous rename, confirm with a rename hint or mark the type as new:\n{}", join_lines(.0))]
    AmbiguousRename(Vec<RenameCandidate>),

    #[error("Upgrade plan cannot be ordered: {0}")]
    UnsatisfiablePlan(String),

    #[error("Operation #{index} ({operation}) failed, upgrade rolled back: {source}")]
    Execution {
        index: usize,
        operation: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Verification found {} mismatched field(s):\n{}", .0.len(), join_lines(.0))]
    Verification(Vec<VerificationFailure>),

    #[error("Upgrade was cancelled before it started applying")]
    Cancelled,

    #[error("Invalid upgrade state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Errors raised before the store is touched; the caller can fix its input and retry.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::ModelValidation(_)
                | Self::AmbiguousRename(_)
                | Self::UnsatisfiablePlan(_)
                | Self::InvalidConfig(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
