//! PostgreSQL database provider implementation

use crate::database::statement::{Dialect, SqlValue, Statement};
use crate::database::traits::{DatabaseError, DatabaseProvider, RowStream, STREAM_BUFFER};
use crate::schema::{
    ColumnDescriptor, ForeignKeyEdge, ParameterDescriptor, ParameterMode, ProcedureDescriptor,
    SemanticType, TableDescriptor, TableName,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgArguments, PgRow, PgTypeKind};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Decode, PgPool, Postgres, Row, Type, TypeInfo};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// PostgreSQL database provider
pub struct PostgresProvider {
    pool: PgPool,
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

impl PostgresProvider {
    /// Create a new PostgreSQL provider
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bind statement values in placeholder order
    fn bind_values<'q>(mut query: PgQuery<'q>, values: &'q [SqlValue]) -> PgQuery<'q> {
        for value in values {
            query = match value {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Bool(value) => query.bind(*value),
                SqlValue::Integer(value) => query.bind(*value),
                SqlValue::Float(value) => query.bind(*value),
                SqlValue::Text(value) => query.bind(value.as_str()),
                SqlValue::Json(value) => query.bind(sqlx::types::Json(value)),
                SqlValue::Bytes(value) => query.bind(value.as_slice()),
            };
        }
        query
    }

    /// Quoted `"udt_schema"."udt_name"`, the type bound text is cast to
    fn cast_type(udt_schema: Option<String>, udt_name: Option<String>) -> Option<String> {
        match (udt_schema, udt_name) {
            (Some(schema), Some(name)) => Some(format!(
                "{}.{}",
                Dialect::quote_identifier(&schema),
                Dialect::quote_identifier(&name)
            )),
            _ => None,
        }
    }

    /// Convert a PostgreSQL row to a JSON object
    ///
    /// Types without a JSON rendering fail the row rather than being guessed at.
    fn row_to_json(row: &PgRow) -> Result<Value, DatabaseError> {
        let mut map = serde_json::Map::new();

        for column in row.columns() {
            let index = column.ordinal();
            let type_info = column.type_info();
            let type_name = type_info.name();

            let value: Value = match type_name {
                "BOOL" => {
                    let val: Option<bool> = row.try_get(index)?;
                    val.map(Value::Bool).unwrap_or(Value::Null)
                }
                "INT2" => {
                    let val: Option<i16> = row.try_get(index)?;
                    val.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
                }
                "INT4" => {
                    let val: Option<i32> = row.try_get(index)?;
                    val.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
                }
                "INT8" => {
                    let val: Option<i64> = row.try_get(index)?;
                    val.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
                }
                "FLOAT4" => {
                    let val: Option<f32> = row.try_get(index)?;
                    val.and_then(|v| serde_json::Number::from_f64(v as f64))
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
                "FLOAT8" => {
                    let val: Option<f64> = row.try_get(index)?;
                    val.and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
                "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "BPCHAR" | "CITEXT" => {
                    let val: Option<String> = row.try_get(index)?;
                    val.map(Value::String).unwrap_or(Value::Null)
                }
                "BYTEA" => {
                    let val: Option<Vec<u8>> = row.try_get(index)?;
                    val.map(|bytes| SqlValue::Bytes(bytes).to_json())
                        .unwrap_or(Value::Null)
                }
                "DATE" => {
                    let val: Option<NaiveDate> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
                }
                "TIMESTAMP" => {
                    let val: Option<NaiveDateTime> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
                }
                "TIMESTAMPTZ" => {
                    let val: Option<DateTime<Utc>> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_rfc3339())).unwrap_or(Value::Null)
                }
                "TIME" => {
                    let val: Option<NaiveTime> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
                }
                "INTERVAL" => {
                    let val: Option<PgInterval> = row.try_get(index)?;
                    val.map(|v| Value::String(format_interval(&v))).unwrap_or(Value::Null)
                }
                "JSON" | "JSONB" => {
                    let val: Option<Value> = row.try_get(index)?;
                    val.unwrap_or(Value::Null)
                }
                "UUID" => {
                    let val: Option<Uuid> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
                }
                "NUMERIC" => {
                    // String keeps the full precision
                    let val: Option<Decimal> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
                }
                "MONEY" => {
                    let val: Option<PgMoney> = row.try_get(index)?;
                    val.map(|v| Value::String(v.to_decimal(2).to_string()))
                        .unwrap_or(Value::Null)
                }
                "INET" | "CIDR" => {
                    let val: Option<IpNetwork> = row.try_get(index)?;
                    val.map(|v| Value::String(format_network(type_name, &v)))
                        .unwrap_or(Value::Null)
                }
                "BOOL[]" => array_to_json::<bool>(row, index, Value::Bool)?,
                "INT2[]" => array_to_json::<i16>(row, index, |v| Value::Number(v.into()))?,
                "INT4[]" => array_to_json::<i32>(row, index, |v| Value::Number(v.into()))?,
                "INT8[]" => array_to_json::<i64>(row, index, |v| Value::Number(v.into()))?,
                "FLOAT8[]" => array_to_json::<f64>(row, index, |v| {
                    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
                })?,
                "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
                    array_to_json::<String>(row, index, Value::String)?
                }
                "NUMERIC[]" => array_to_json::<Decimal>(row, index, |v| Value::String(v.to_string()))?,
                "UUID[]" => array_to_json::<Uuid>(row, index, |v| Value::String(v.to_string()))?,
                "DATE[]" => array_to_json::<NaiveDate>(row, index, |v| Value::String(v.to_string()))?,
                "TIMESTAMPTZ[]" => {
                    array_to_json::<DateTime<Utc>>(row, index, |v| Value::String(v.to_rfc3339()))?
                }
                _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
                    // Enum values travel as their label
                    let val: Option<String> = row.try_get_unchecked(index)?;
                    val.map(Value::String).unwrap_or(Value::Null)
                }
                _ => {
                    let val: Option<String> = row.try_get(index).map_err(|error| {
                        DatabaseError::Serialization(format!(
                            "Cannot render column {} of type {}: {}",
                            column.name(),
                            type_name,
                            error
                        ))
                    })?;
                    val.map(Value::String).unwrap_or(Value::Null)
                }
            };

            map.insert(column.name().to_string(), value);
        }

        Ok(Value::Object(map))
    }

    async fn list_parameters(
        &self,
        schema: &str,
        specific_name: &str,
    ) -> Result<Vec<ParameterDescriptor>, DatabaseError> {
        let query = r#"
            SELECT
                parameter_name::text AS parameter_name,
                data_type::text AS data_type,
                parameter_mode::text AS parameter_mode,
                udt_schema::text AS udt_schema,
                udt_name::text AS udt_name
            FROM information_schema.parameters
            WHERE specific_schema = $1
              AND specific_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = sqlx::query(query)
            .bind(schema)
            .bind(specific_name)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)?;

        rows.iter()
            .map(|row| {
                let data_type: String = row.try_get("data_type")?;
                let mode: Option<String> = row.try_get("parameter_mode")?;
                Ok(ParameterDescriptor {
                    name: row.try_get::<Option<String>, _>("parameter_name")?.unwrap_or_default(),
                    semantic_type: SemanticType::from_sql_type(&data_type),
                    data_type,
                    mode: ParameterMode::from_sql(mode.as_deref()),
                    cast_type: Self::cast_type(row.try_get("udt_schema")?, row.try_get("udt_name")?),
                    reference: None,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(DatabaseError::metadata)
    }

    async fn foreign_keys(&self, table: &TableName) -> Result<BTreeMap<String, ForeignKeyEdge>, DatabaseError> {
        let query = r#"
            SELECT
                a.attname::text AS column_name,
                rn.nspname::text AS references_schema,
                rt.relname::text AS references_table,
                ra.attname::text AS references_column
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
            JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
            CROSS JOIN LATERAL unnest(c.conkey, c.confkey) AS k(local_attnum, foreign_attnum)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.local_attnum
            JOIN pg_catalog.pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.foreign_attnum
            WHERE c.contype = 'f'
              AND n.nspname = $1
              AND t.relname = $2
        "#;

        let rows = sqlx::query(query)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)?;

        rows.iter()
            .map(|row| {
                let column: String = row.try_get("column_name")?;
                let edge = ForeignKeyEdge {
                    column: column.clone(),
                    references_table: TableName::new(
                        row.try_get::<String, _>("references_schema")?,
                        row.try_get::<String, _>("references_table")?,
                    ),
                    references_column: row.try_get("references_column")?,
                };
                Ok((column, edge))
            })
            .collect::<Result<BTreeMap<_, _>, sqlx::Error>>()
            .map_err(DatabaseError::metadata)
    }
}

/// Decode a one-dimensional array column, keeping NULL elements
fn array_to_json<T>(row: &PgRow, index: usize, render: impl Fn(T) -> Value) -> Result<Value, DatabaseError>
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
    Vec<Option<T>>: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
    let val: Option<Vec<Option<T>>> = row.try_get(index)?;
    Ok(val
        .map(|items| {
            Value::Array(
                items
                    .into_iter()
                    .map(|item| item.map(&render).unwrap_or(Value::Null))
                    .collect(),
            )
        })
        .unwrap_or(Value::Null))
}

/// Render an address the way the server prints it: `inet` host addresses
/// drop the full-length prefix, `cidr` always shows it
fn format_network(type_name: &str, network: &IpNetwork) -> String {
    let full_length = if network.is_ipv4() { 32 } else { 128 };
    if type_name == "INET" && network.prefix() == full_length {
        network.ip().to_string()
    } else {
        format!("{}/{}", network.ip(), network.prefix())
    }
}

/// Render an interval in the server's default `postgres` output style,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`
fn format_interval(interval: &PgInterval) -> String {
    fn unit(count: i64, singular: &str, plural: &str) -> String {
        format!("{} {}", count, if count == 1 { singular } else { plural })
    }

    let mut parts = Vec::new();
    let years = i64::from(interval.months / 12);
    let months = i64::from(interval.months % 12);
    if years != 0 {
        parts.push(unit(years, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months, "mon", "mons"));
    }
    if interval.days != 0 {
        parts.push(unit(i64::from(interval.days), "day", "days"));
    }

    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let total = interval.microseconds.unsigned_abs();
        let seconds = total / 1_000_000;
        let fraction = total % 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        );
        if fraction != 0 {
            time.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

#[async_trait]
impl DatabaseProvider for PostgresProvider {
    fn dialect(&self) -> Dialect {
        Dialect::POSTGRES
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    async fn list_schemas(&self) -> Result<Vec<String>, DatabaseError> {
        let query = "SELECT nspname::text AS schema_name FROM pg_catalog.pg_namespace ORDER BY nspname";
        sqlx::query_scalar(query)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DatabaseError> {
        let query = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
              AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        sqlx::query_scalar(query)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }

    async fn list_views(&self, schema: &str) -> Result<Vec<String>, DatabaseError> {
        let query = r#"
            SELECT table_name::text
            FROM information_schema.views
            WHERE table_schema = $1
            ORDER BY table_name
        "#;

        sqlx::query_scalar(query)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }

    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureDescriptor>, DatabaseError> {
        let query = r#"
            SELECT routine_name::text AS routine_name, specific_name::text AS specific_name
            FROM information_schema.routines
            WHERE routine_type = 'PROCEDURE'
              AND specific_schema = $1
              AND routine_name IS NOT NULL
            ORDER BY routine_name
        "#;

        let rows = sqlx::query(query)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)?;

        let mut procedures = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("routine_name").map_err(DatabaseError::metadata)?;
            let specific_name: String = row.try_get("specific_name").map_err(DatabaseError::metadata)?;
            let parameters = self.list_parameters(schema, &specific_name).await?;
            procedures.push(ProcedureDescriptor {
                schema: schema.to_string(),
                name,
                specific_name,
                parameters,
            });
        }

        Ok(procedures)
    }

    async fn get_primary_key(&self, table: &TableName) -> Result<Vec<String>, DatabaseError> {
        let query = r#"
            SELECT a.attname::text
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, position)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE c.contype = 'p'
              AND n.nspname = $1
              AND t.relname = $2
            ORDER BY k.position
        "#;

        sqlx::query_scalar(query)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)
    }

    async fn get_table_schema(&self, table: &TableName) -> Result<TableDescriptor, DatabaseError> {
        let column_query = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default,
                udt_schema::text AS udt_schema,
                udt_name::text AS udt_name,
                is_identity::text AS is_identity,
                is_generated::text AS is_generated
            FROM information_schema.columns
            WHERE table_schema = $1
              AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let column_rows = sqlx::query(column_query)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::metadata)?;

        if column_rows.is_empty() {
            return Err(DatabaseError::TableNotFound(table.to_string()));
        }

        let primary_key = self.get_primary_key(table).await?;
        let foreign_keys = self.foreign_keys(table).await?;

        let columns: Vec<ColumnDescriptor> = column_rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let is_nullable: String = row.try_get("is_nullable")?;
                let default_value: Option<String> = row.try_get("column_default")?;
                let is_identity: Option<String> = row.try_get("is_identity")?;
                let is_generated: Option<String> = row.try_get("is_generated")?;

                let is_generated = default_value
                    .as_deref()
                    .map(|default| default.to_lowercase().starts_with("nextval("))
                    .unwrap_or(false)
                    || is_identity.as_deref() == Some("YES")
                    || is_generated.as_deref() == Some("ALWAYS");

                Ok(ColumnDescriptor {
                    is_primary_key: primary_key.contains(&name),
                    semantic_type: SemanticType::from_sql_type(&data_type),
                    cast_type: Self::cast_type(row.try_get("udt_schema")?, row.try_get("udt_name")?),
                    name,
                    data_type,
                    nullable: is_nullable == "YES",
                    default_value,
                    is_generated,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(DatabaseError::metadata)?;

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
