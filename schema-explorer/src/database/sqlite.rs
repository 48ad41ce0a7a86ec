//! SQLite database provider implementation

use crate::database::statement::{Dialect, SqlValue, Statement};
use crate::database::traits::{DatabaseError, DatabaseProvider, RowStream, STREAM_BUFFER};
use crate::schema::{ColumnDescriptor, ForeignKeyEdge, ProcedureDescriptor, SemanticType, TableDescriptor, TableName};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteColumn, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// SQLite database provider
///
/// Attached databases show up as schemas; the primary database is `main`.
/// SQLite has no stored procedures, so the procedure list is always empty.
pub struct SqliteProvider {
    pool: SqlitePool,
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

impl SqliteProvider {
    /// Create a new SQLite provider
    ///
    /// # Arguments
    ///
    /// * `pool` - SQLite connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn bind_values<'q>(mut query: SqliteQuery<'q>, values: &'q [SqlValue]) -> SqliteQuery<'q> {
        for value in values {
            query = match value {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Bool(value) => query.bind(*value),
                SqlValue::Integer(value) => query.bind(*value),
                SqlValue::Float(value) => query.bind(*value),
                SqlValue::Text(value) => query.bind(value.as_str()),
                SqlValue::Json(value) => query.bind(value.to_string()),
                SqlValue::Bytes(value) => query.bind(value.as_slice()),
            };
        }
        query
    }

    /// Convert a SQLite row to a JSON object
    fn row_to_json(row: &SqliteRow) -> Result<Value, DatabaseError> {
        let mut map = serde_json::Map::new();

        for column in row.columns() {
            let value = Self::extract_column_value(row, column)?;
            map.insert(column.name().to_string(), value);
        }

        Ok(Value::Object(map))
    }

    /// Extract a column value from a SQLite row and convert to JSON
    ///
    /// SQLite is dynamically typed, so the storage class of the value decides
    /// the decoding. Declared BOOLEAN columns are the exception: they store
    /// integers but render as `true`/`false`.
    fn extract_column_value(row: &SqliteRow, column: &SqliteColumn) -> Result<Value, DatabaseError> {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let storage_class = raw.type_info().name().to_string();
        let declared = column.type_info().name().to_ascii_uppercase();

        let value = match (declared.as_str(), storage_class.as_str()) {
            ("BOOLEAN" | "BOOL", "INTEGER") => Value::Bool(row.try_get::<bool, _>(index)?),
            (_, "INTEGER") => Value::Number(row.try_get::<i64, _>(index)?.into()),
            (_, "REAL") => serde_json::Number::from_f64(row.try_get::<f64, _>(index)?)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            (_, "BLOB") => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(index)?).to_json(),
            _ => Value::String(row.try_get::<String, _>(index)?),
        };

        Ok(value)
    }

    async fn foreign_keys(&self, table: &TableName) -> Result<BTreeMap<String, ForeignKeyEdge>, DatabaseError> {
        // PRAGMA foreign_key_list returns: id, seq, table, from, to, on_update, on_delete, match
        let rows = sqlx::query(r#"SELECT "from", "table", "to" FROM pragma_foreign_key_list(?, ?)"#)
            .bind(&table.name)
            .bind(&table.schema)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)?;

        let mut foreign_keys = BTreeMap::new();
        for row in rows {
            let column: String = row.try_get("from").map_err(DatabaseError::metadata)?;
            let referenced: String = row.try_get("table").map_err(DatabaseError::metadata)?;
            let to: Option<String> = row.try_get("to").map_err(DatabaseError::metadata)?;
            let references_table = TableName::new(table.schema.clone(), referenced);

            // A bare `REFERENCES t` points at the primary key of `t`
            let references_column = match to {
                Some(to) => to,
                None => match self.get_primary_key(&references_table).await?.into_iter().next() {
                    Some(primary_key) => primary_key,
                    None => continue,
                },
            };

            foreign_keys.insert(
                column.clone(),
                ForeignKeyEdge {
                    column,
                    references_table,
                    references_column,
                },
            );
        }

        Ok(foreign_keys)
    }

    async fn list_objects(&self, schema: &str, object_type: &str) -> Result<Vec<String>, DatabaseError> {
        let query = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = ? AND name NOT LIKE 'sqlite_%' ORDER BY name",
            Dialect::quote_identifier(schema)
        );

        sqlx::query_scalar(&query)
            .bind(object_type)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }
}

#[async_trait]
impl DatabaseProvider for SqliteProvider {
    fn dialect(&self) -> Dialect {
        Dialect::SQLITE
    }

    fn default_schema(&self) -> &'static str {
        "main"
    }

    async fn list_schemas(&self) -> Result<Vec<String>, DatabaseError> {
        sqlx::query_scalar("SELECT name FROM pragma_database_list ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DatabaseError> {
        self.list_objects(schema, "table").await
    }

    async fn list_views(&self, schema: &str) -> Result<Vec<String>, DatabaseError> {
        self.list_objects(schema, "view").await
    }

    async fn list_procedures(&self, _schema: &str) -> Result<Vec<ProcedureDescriptor>, DatabaseError> {
        Ok(Vec::new())
    }

    async fn get_primary_key(&self, table: &TableName) -> Result<Vec<String>, DatabaseError> {
        sqlx::query_scalar("SELECT name FROM pragma_table_xinfo(?, ?) WHERE pk > 0 ORDER BY pk")
            .bind(&table.name)
            .bind(&table.schema)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }

    async fn get_table_schema(&self, table: &TableName) -> Result<TableDescriptor, DatabaseError> {
        // PRAGMA table_xinfo returns: cid, name, type, notnull, dflt_value, pk, hidden
        let column_rows = sqlx::query(
            r#"SELECT name, type, "notnull", dflt_value, pk, hidden FROM pragma_table_xinfo(?, ?) ORDER BY cid"#,
        )
        .bind(&table.name)
        .bind(&table.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::metadata)?;

        if column_rows.is_empty() {
            return Err(DatabaseError::TableNotFound(table.to_string()));
        }

        let mut columns = Vec::new();
        let mut primary_key_columns = Vec::new();

        for row in column_rows {
            let name: String = row.try_get("name").map_err(DatabaseError::metadata)?;
            let data_type: String = row.try_get("type").map_err(DatabaseError::metadata)?;
            let not_null: i64 = row.try_get("notnull").map_err(DatabaseError::metadata)?;
            let default_value: Option<String> = row.try_get("dflt_value").map_err(DatabaseError::metadata)?;
            let primary_key: i64 = row.try_get("pk").map_err(DatabaseError::metadata)?;
            let hidden: i64 = row.try_get("hidden").map_err(DatabaseError::metadata)?;

            // Hidden columns of virtual tables are not part of the row
            if hidden == 1 {
                continue;
            }

            if primary_key > 0 {
                primary_key_columns.push((primary_key, name.clone()));
            }

            columns.push(ColumnDescriptor {
                semantic_type: SemanticType::from_sql_type(&data_type),
                name,
                data_type,
                nullable: not_null == 0 && primary_key == 0,
                default_value,
                is_primary_key: primary_key > 0,
                is_generated: hidden == 2 || hidden == 3,
                cast_type: None,
            });
        }

        primary_key_columns.sort_by_key(|(order, _)| *order);
        let primary_key: Vec<String> = primary_key_columns.into_iter().map(|(_, name)| name).collect();

        // A lone INTEGER PRIMARY KEY aliases the rowid and is assigned on insert
        if let [only] = primary_key.as_slice() {
            if let Some(column) = columns.iter_mut().find(|column| &column.name == only) {
                if column.data_type.eq_ignore_ascii_case("INTEGER") {
                    column.is_generated = true;
                }
            }
        }

        let foreign_keys = self.foreign_keys(table).await?;

        Ok(TableDescriptor {
            name: table.clone(),
            columns,
            primary_key,
            foreign_keys,
        })
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Value>, DatabaseError> {
        let rows = Self::bind_values(sqlx::query(&statement.sql), &statement.values)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_json).collect()
    }

    async fn execute(&self, statement: Statement) -> Result<u64, DatabaseError> {
        let result = Self::bind_values(sqlx::query(&statement.sql), &statement.values)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn stream(&self, statement: Statement) -> RowStream {
        let pool = self.pool.clone();
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut rows = Self::bind_values(sqlx::query(&statement.sql), &statement.values).fetch(&pool);
            while let Some(row) = rows.next().await {
                let item = row
                    .map_err(DatabaseError::from)
                    .and_then(|row| Self::row_to_json(&row));
                let failed = item.is_err();
                if sender.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        ReceiverStream::new(receiver).boxed()
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
