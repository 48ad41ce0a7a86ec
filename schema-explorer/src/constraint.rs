//! Constraint violation classification and field error mapping
//!
//! Stores report violations through their own code taxonomy. They are
//! normalized into a [`ConstraintViolation`] once, in the `sqlx::Error`
//! conversion, and mapped to user-facing [`FieldErrors`] here.

use crate::schema::FieldErrors;
use serde::Serialize;
use std::fmt;

/// Normalized violation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    NotNull,
    Unique,
    ForeignKey,
    Check,
    StringTooLong,
    NumericOutOfRange,
    Other,
}

impl ViolationKind {
    /// Map a PostgreSQL SQLSTATE
    ///
    /// Returns `None` for codes outside the data exception (22) and integrity
    /// constraint (23) classes.
    pub fn from_sqlstate(code: &str) -> Option<Self> {
        match code {
            "23502" => Some(ViolationKind::NotNull),
            "23505" => Some(ViolationKind::Unique),
            "23503" => Some(ViolationKind::ForeignKey),
            "23514" => Some(ViolationKind::Check),
            "22001" => Some(ViolationKind::StringTooLong),
            "22003" => Some(ViolationKind::NumericOutOfRange),
            other if other.starts_with("22") || other.starts_with("23") => Some(ViolationKind::Other),
            _ => None,
        }
    }
}

/// A store-reported constraint or data violation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    /// Store-specific code (SQLSTATE or extended result code)
    pub code: Option<String>,
    /// Offending column, when the store names one
    pub column: Option<String>,
    pub constraint: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ConstraintViolation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            column: None,
            constraint: None,
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// Extract a violation from a driver error, if it is one
    pub fn from_database_error(error: &dyn sqlx::error::DatabaseError) -> Option<Self> {
        #[cfg(feature = "postgres")]
        if let Some(postgres_error) = error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            return Self::from_postgres(postgres_error);
        }

        let kind = match error.kind() {
            sqlx::error::ErrorKind::NotNullViolation => ViolationKind::NotNull,
            sqlx::error::ErrorKind::UniqueViolation => ViolationKind::Unique,
            sqlx::error::ErrorKind::ForeignKeyViolation => ViolationKind::ForeignKey,
            sqlx::error::ErrorKind::CheckViolation => ViolationKind::Check,
            _ if is_sqlite_constraint_code(error.code().as_deref()) => ViolationKind::Other,
            _ => return None,
        };

        let message = error.message().to_string();
        let (column, constraint) = match kind {
            ViolationKind::NotNull => (column_from_failed_message(&message), None),
            ViolationKind::Check => (None, subject_from_failed_message(&message)),
            _ => (None, None),
        };

        Some(Self {
            kind,
            code: error.code().map(|code| code.into_owned()),
            column,
            constraint: constraint.or_else(|| error.constraint().map(str::to_string)),
            message,
            detail: None,
            hint: None,
        })
    }

    #[cfg(feature = "postgres")]
    fn from_postgres(error: &sqlx::postgres::PgDatabaseError) -> Option<Self> {
        let kind = ViolationKind::from_sqlstate(error.code())?;
        let detail = error.detail().map(str::to_string);
        let mut column = error.column().map(str::to_string);
        if column.is_none() && kind == ViolationKind::ForeignKey {
            column = detail.as_deref().and_then(key_column_from_detail);
        }

        Some(Self {
            kind,
            code: Some(error.code().to_string()),
            column,
            constraint: error.constraint().map(str::to_string),
            message: error.message().to_string(),
            detail,
            hint: error.hint().map(str::to_string),
        })
    }

    /// Primary message with detail and hint appended when present
    pub fn diagnostic(&self) -> String {
        let mut message = self.message.clone();
        if let Some(detail) = &self.detail {
            message.push_str("; ");
            message.push_str(detail);
        }
        if let Some(hint) = &self.hint {
            message.push_str(&format!(" (hint: {})", hint));
        }
        message
    }

    fn named_constraint(&self) -> String {
        self.constraint
            .as_ref()
            .map(|constraint| format!(" ({})", constraint))
            .unwrap_or_default()
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.diagnostic())
    }
}

/// Translate a violation into field-scoped or global messages
///
/// Unique violations are always global: uniqueness is usually composite, so
/// pinning it on one field would mislead even when the store names a column.
pub fn map_violation(violation: &ConstraintViolation) -> FieldErrors {
    let diagnostic = violation.diagnostic();
    let column = violation.column.as_deref();

    match (violation.kind, column) {
        (ViolationKind::NotNull, Some(column)) => FieldErrors::field(column, "Required (NOT NULL)."),
        (ViolationKind::Unique, _) => FieldErrors::global(format!(
            "Unique constraint violated{}. {}",
            violation.named_constraint(),
            diagnostic
        )),
        (ViolationKind::ForeignKey, Some(column)) => {
            FieldErrors::field(column, "Invalid reference (foreign key).")
        }
        (ViolationKind::ForeignKey, None) => FieldErrors::global(format!(
            "Foreign key constraint violated{}. {}",
            violation.named_constraint(),
            diagnostic
        )),
        (ViolationKind::Check, _) => FieldErrors::global(format!(
            "Check constraint violated{}. {}",
            violation.named_constraint(),
            diagnostic
        )),
        (ViolationKind::StringTooLong, Some(column)) => {
            FieldErrors::field(column, "Value too long for this column.")
        }
        (ViolationKind::NumericOutOfRange, Some(column)) => {
            FieldErrors::field(column, "Numeric value out of range.")
        }
        (_, Some(column)) => FieldErrors::field(column, diagnostic),
        (_, None) => FieldErrors::global(diagnostic),
    }
}

/// SQLite extended result codes share the primary code SQLITE_CONSTRAINT (19)
fn is_sqlite_constraint_code(code: Option<&str>) -> bool {
    code.and_then(|code| code.parse::<i64>().ok())
        .map(|code| code & 0xff == 19)
        .unwrap_or(false)
}

/// Text after `... constraint failed: `
fn subject_from_failed_message(message: &str) -> Option<String> {
    message
        .split_once("failed: ")
        .map(|(_, subject)| subject.trim().to_string())
        .filter(|subject| !subject.is_empty())
}

/// `NOT NULL constraint failed: investors.email` names `email`
fn column_from_failed_message(message: &str) -> Option<String> {
    let subject = subject_from_failed_message(message)?;
    if subject.contains(',') {
        return None;
    }
    subject
        .rsplit('.')
        .next()
        .map(str::to_string)
}

/// `Key (company_id)=(42) is not present in table "companies".` names `company_id`
///
/// Composite keys are not attributed to a single field.
fn key_column_from_detail(detail: &str) -> Option<String> {
    let start = detail.find("Key (")? + "Key (".len();
    let end = start + detail[start..].find(")=")?;
    let column = detail[start..end].trim();
    if column.is_empty() || column.contains(',') {
        return None;
    }
    Some(column.trim_matches('"').to_string())
}
