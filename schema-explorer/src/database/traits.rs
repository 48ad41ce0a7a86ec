//! Database provider trait
//!
//! This trait defines the interface that all database implementations must provide.

use crate::constraint::ConstraintViolation;
use crate::database::statement::{Dialect, Statement};
use crate::schema::{ProcedureDescriptor, TableDescriptor, TableName};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Rows streamed one at a time as JSON objects
pub type RowStream = BoxStream<'static, Result<serde_json::Value, DatabaseError>>;

/// Number of rows a streaming producer may run ahead of its consumer
pub(crate) const STREAM_BUFFER: usize = 64;

/// Database provider trait for schema discovery and data access
///
/// Implementations supply raw metadata and execute already-built statements.
/// Heuristics, filtering and coercion live above this trait and are shared by
/// every store.
#[async_trait]
pub trait DatabaseProvider: Send + Sync + 'static {
    /// SQL spelling used when building statements for this store
    fn dialect(&self) -> Dialect;

    /// Schema that unqualified table names resolve to
    fn default_schema(&self) -> &'static str;

    /// List all schema names, system schemas included
    async fn list_schemas(&self) -> Result<Vec<String>, DatabaseError>;

    /// List base table names in one schema
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DatabaseError>;

    /// List view names in one schema
    async fn list_views(&self, schema: &str) -> Result<Vec<String>, DatabaseError>;

    /// List stored procedures in one schema with their ordered parameters
    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureDescriptor>, DatabaseError>;

    /// Get the primary key column names of a table in key order
    ///
    /// An empty vector means the table has no primary key.
    async fn get_primary_key(&self, table: &TableName) -> Result<Vec<String>, DatabaseError>;

    /// Get schema information for a specific table
    ///
    /// # Errors
    ///
    /// [`DatabaseError::TableNotFound`] when the table has no columns visible
    /// to the connection.
    async fn get_table_schema(&self, table: &TableName) -> Result<TableDescriptor, DatabaseError>;

    /// Run a statement and return every row as a JSON object
    async fn fetch_all(&self, statement: Statement) -> Result<Vec<serde_json::Value>, DatabaseError>;

    /// Run a statement that returns no rows and report the affected row count
    async fn execute(&self, statement: Statement) -> Result<u64, DatabaseError>;

    /// Run a statement and stream its rows without materializing them
    ///
    /// The connection is held by a background task and released when the
    /// result is exhausted, fails, or the stream is dropped.
    fn stream(&self, statement: Statement) -> RowStream;

    /// Verify connectivity
    async fn ping(&self) -> Result<(), DatabaseError>;
}

/// Database error type
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The store could not be reached
    #[error("Connection unavailable: {0}")]
    Connection(String),

    /// Metadata could not be loaded
    #[error("Schema error: {0}")]
    Schema(String),

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Invalid column name
    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    /// Malformed or unsupported query shape
    #[error("Invalid query: {0}")]
    Query(String),

    /// Procedure is not in the catalog's procedure list
    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),

    /// The store rejected data with a constraint or data-exception code
    #[error("{0}")]
    Constraint(ConstraintViolation),

    /// Any other failure reported by the store
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Classify a failure raised while reading metadata
    pub(crate) fn metadata(error: sqlx::Error) -> Self {
        match Self::from(error) {
            DatabaseError::Database(message) => DatabaseError::Schema(message),
            other => other,
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(database_error) => {
                match ConstraintViolation::from_database_error(database_error.as_ref()) {
                    Some(violation) => DatabaseError::Constraint(violation),
                    None => DatabaseError::Database(database_error.message().to_string()),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => DatabaseError::Connection(error.to_string()),
            other => DatabaseError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        DatabaseError::Serialization(error.to_string())
    }
}
