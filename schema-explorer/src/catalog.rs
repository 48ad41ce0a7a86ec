//! Live metadata access
//!
//! [`SchemaCatalog`] wraps a provider and adds the cross-store rules:
//! system schema exclusion, sorting, default-schema fallback and name
//! parsing. Nothing is cached.

use crate::database::traits::{DatabaseError, DatabaseProvider};
use crate::relationships::TableKey;
use crate::schema::{ForeignKeyEdge, ProcedureDescriptor, TableDescriptor, TableName};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Schemas that never hold user tables
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "pg_catalog", "pg_toast", "temp"];

pub fn is_system_schema(schema: &str) -> bool {
    SYSTEM_SCHEMAS.contains(&schema) || schema.starts_with("pg_temp") || schema.starts_with("pg_toast_temp")
}

pub struct SchemaCatalog<DB: DatabaseProvider> {
    database: Arc<DB>,
}

impl<DB: DatabaseProvider> Clone for SchemaCatalog<DB> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
        }
    }
}

impl<DB: DatabaseProvider> SchemaCatalog<DB> {
    pub fn new(database: Arc<DB>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &DB {
        &self.database
    }

    /// Parse `schema.table` or `table` against this store's default schema
    pub fn parse_table(&self, input: &str) -> TableName {
        TableName::parse(input, self.database.default_schema())
    }

    /// All user tables, sorted by `schema.table`
    ///
    /// Falls back to the default schema alone when no user schema yields a
    /// table.
    pub async fn list_tables(&self) -> Result<Vec<TableName>, DatabaseError> {
        let mut tables = Vec::new();
        for schema in self.database.list_schemas().await? {
            if is_system_schema(&schema) {
                continue;
            }
            for name in self.database.list_tables(&schema).await? {
                tables.push(TableName::new(schema.clone(), name));
            }
        }

        if tables.is_empty() {
            let schema = self.database.default_schema();
            tables = self
                .database
                .list_tables(schema)
                .await?
                .into_iter()
                .map(|name| TableName::new(schema, name))
                .collect();
        }

        tables.sort();
        Ok(tables)
    }

    pub async fn list_views(&self) -> Result<Vec<String>, DatabaseError> {
        let mut views = self.database.list_views(self.database.default_schema()).await?;
        views.sort();
        Ok(views)
    }

    /// Procedures of the default schema with their declared parameters
    pub async fn list_procedures(&self) -> Result<Vec<ProcedureDescriptor>, DatabaseError> {
        let mut procedures = self
            .database
            .list_procedures(self.database.default_schema())
            .await?;
        procedures.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(procedures)
    }

    /// Look up one procedure by name in the live procedure list
    ///
    /// # Errors
    ///
    /// [`DatabaseError::UnknownProcedure`] when no procedure has that name.
    pub async fn procedure(&self, name: &str) -> Result<ProcedureDescriptor, DatabaseError> {
        self.list_procedures()
            .await?
            .into_iter()
            .find(|procedure| procedure.name == name)
            .ok_or_else(|| DatabaseError::UnknownProcedure(name.to_string()))
    }

    pub async fn describe_table(&self, table: &TableName) -> Result<TableDescriptor, DatabaseError> {
        self.database.get_table_schema(table).await
    }

    pub async fn primary_key(&self, table: &TableName) -> Result<Vec<String>, DatabaseError> {
        self.database.get_primary_key(table).await
    }

    pub async fn foreign_keys(&self, table: &TableName) -> Result<BTreeMap<String, ForeignKeyEdge>, DatabaseError> {
        Ok(self.describe_table(table).await?.foreign_keys)
    }

    /// Every user table with its primary key, in [`list_tables`](Self::list_tables) order
    pub async fn table_keys(&self) -> Result<Vec<TableKey>, DatabaseError> {
        let mut keys = Vec::new();
        for table in self.list_tables().await? {
            let primary_key = self.primary_key(&table).await?;
            keys.push(TableKey { table, primary_key });
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_schemas() {
        assert!(is_system_schema("pg_catalog"));
        assert!(is_system_schema("information_schema"));
        assert!(is_system_schema("pg_temp_3"));
        assert!(is_system_schema("pg_toast_temp_3"));
        assert!(!is_system_schema("public"));
        assert!(!is_system_schema("main"));
        assert!(!is_system_schema("sales"));
    }
}
