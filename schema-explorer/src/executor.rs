//! Parameterized select, insert, call and export statements
//!
//! Statement shapes come only from catalog metadata. Table, column and
//! procedure identifiers are quoted from descriptors; caller input only ever
//! reaches the store as bound values.

use crate::coerce::{coerce_single, BoundValue};
use crate::database::statement::{Dialect, Statement, StatementBuilder};
use crate::database::traits::{DatabaseError, DatabaseProvider, RowStream};
use crate::filter::Predicate;
use crate::schema::{FieldErrors, ParameterMode, ProcedureDescriptor, TableDescriptor, TableName};
use std::collections::HashMap;

/// Row ordering for a select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// Primary key columns descending, so recently inserted rows come first
    LatestFirst,
    /// Whatever order the store returns
    Unordered,
}

impl RowOrder {
    pub fn from_latest_first(latest_first: bool) -> Self {
        if latest_first {
            RowOrder::LatestFirst
        } else {
            RowOrder::Unordered
        }
    }
}

/// `SELECT * FROM table [WHERE ..] [ORDER BY pk DESC] [LIMIT n [OFFSET m]]`
pub fn select_statement(
    dialect: Dialect,
    table: &TableDescriptor,
    predicates: &[Predicate],
    order: RowOrder,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("SELECT * FROM ")
        .push_table(&table.name)
        .push_where(predicates);

    if order == RowOrder::LatestFirst && !table.primary_key.is_empty() {
        builder.push_sql(" ORDER BY ");
        for (index, column) in table.primary_key.iter().enumerate() {
            if index > 0 {
                builder.push_sql(", ");
            }
            builder.push_identifier(column).push_sql(" DESC");
        }
    }

    if let Some(limit) = limit {
        builder.push_limit(limit, offset);
    }
    builder.build()
}

/// `SELECT COUNT(*) AS "count" FROM table [WHERE ..]`
pub fn count_statement(dialect: Dialect, table: &TableDescriptor, predicates: &[Predicate]) -> Statement {
    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("SELECT COUNT(*) AS \"count\" FROM ")
        .push_table(&table.name)
        .push_where(predicates);
    builder.build()
}

/// `INSERT INTO table (cols) VALUES (..)`, or `DEFAULT VALUES` when nothing is bound
pub fn insert_statement(dialect: Dialect, table: &TableName, values: &[BoundValue]) -> Statement {
    let mut builder = StatementBuilder::new(dialect);
    builder.push_sql("INSERT INTO ").push_table(table);

    if values.is_empty() {
        builder.push_sql(" DEFAULT VALUES");
        return builder.build();
    }

    builder.push_sql(" (");
    for (index, bound) in values.iter().enumerate() {
        if index > 0 {
            builder.push_sql(", ");
        }
        builder.push_identifier(&bound.name);
    }
    builder.push_sql(") VALUES (");
    for (index, bound) in values.iter().enumerate() {
        if index > 0 {
            builder.push_sql(", ");
        }
        builder.push_value(bound.value.clone(), bound.cast_type.as_deref());
    }
    builder.push_sql(")");
    builder.build()
}

/// `CALL "schema"."procedure"("param" => $1, ...)`
///
/// Arguments use named notation in declaration order. OUT parameters are
/// passed as NULL; IN parameters without an argument are left out so the
/// procedure's own defaults apply.
pub fn call_statement(
    dialect: Dialect,
    procedure: &ProcedureDescriptor,
    arguments: &[BoundValue],
) -> Statement {
    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("CALL ")
        .push_table(&TableName::new(procedure.schema.clone(), procedure.name.clone()))
        .push_sql("(");

    let mut first = true;
    for parameter in procedure.parameters.iter().filter(|parameter| !parameter.name.is_empty()) {
        let argument = arguments.iter().find(|bound| bound.name == parameter.name);
        if parameter.mode != ParameterMode::Out && argument.is_none() {
            continue;
        }
        if !first {
            builder.push_sql(", ");
        }
        first = false;

        builder.push_identifier(&parameter.name).push_sql(" => ");
        match argument {
            Some(bound) if parameter.mode != ParameterMode::Out => {
                builder.push_value(bound.value.clone(), bound.cast_type.as_deref());
            }
            _ => {
                builder.push_sql("NULL");
            }
        }
    }

    builder.push_sql(")");
    builder.build()
}

/// Coerce submitted procedure arguments against the declared parameters
///
/// A submitted name that is empty or not a declared parameter fails the
/// whole call with [`DatabaseError::Query`]. Values that do not parse are collected as
/// field errors, one per parameter.
pub fn coerce_arguments(
    procedure: &ProcedureDescriptor,
    form: &HashMap<String, String>,
) -> Result<Result<Vec<BoundValue>, FieldErrors>, DatabaseError> {
    // Unnamed parameters cannot be passed in named notation
    let mut undeclared: Vec<&str> = form
        .keys()
        .filter(|name| name.is_empty() || procedure.parameter(name).is_none())
        .map(|name| if name.is_empty() { "\"\"" } else { name.as_str() })
        .collect();
    if !undeclared.is_empty() {
        undeclared.sort_unstable();
        return Err(DatabaseError::Query(format!(
            "Unknown parameter(s) for {}: {}",
            procedure.name,
            undeclared.join(", ")
        )));
    }

    let mut arguments = Vec::new();
    let mut errors = FieldErrors::default();
    for parameter in &procedure.parameters {
        if parameter.mode == ParameterMode::Out {
            continue;
        }
        let Some(raw) = form.get(&parameter.name) else {
            continue;
        };
        match coerce_single(parameter.semantic_type, raw) {
            Ok(value) => arguments.push(BoundValue {
                name: parameter.name.clone(),
                value,
                cast_type: parameter.cast_type.clone(),
            }),
            Err(message) => {
                errors.fields.insert(parameter.name.clone(), message);
            }
        }
    }

    Ok(if errors.is_empty() {
        Ok(arguments)
    } else {
        Err(errors)
    })
}

fn count_from_row(row: &serde_json::Value) -> u64 {
    match row.get("count") {
        Some(serde_json::Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_i64().map(|count| count.max(0) as u64))
            .unwrap_or(0),
        Some(serde_json::Value::String(text)) => text.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Runs built statements against a provider
pub struct QueryExecutor<'a, DB: DatabaseProvider> {
    database: &'a DB,
}

impl<'a, DB: DatabaseProvider> QueryExecutor<'a, DB> {
    pub fn new(database: &'a DB) -> Self {
        Self { database }
    }

    fn dialect(&self) -> Dialect {
        self.database.dialect()
    }

    pub async fn select(
        &self,
        table: &TableDescriptor,
        predicates: &[Predicate],
        order: RowOrder,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<serde_json::Value>, DatabaseError> {
        let statement = select_statement(self.dialect(), table, predicates, order, Some(limit), Some(offset));
        tracing::debug!(table = %table.name, sql = %statement.sql, "select");
        self.database.fetch_all(statement).await
    }

    pub async fn count(&self, table: &TableDescriptor, predicates: &[Predicate]) -> Result<u64, DatabaseError> {
        let statement = count_statement(self.dialect(), table, predicates);
        let rows = self.database.fetch_all(statement).await?;
        Ok(rows.first().map(count_from_row).unwrap_or(0))
    }

    /// Insert one row; constraint failures come back as [`DatabaseError::Constraint`]
    pub async fn insert(&self, table: &TableName, values: &[BoundValue]) -> Result<u64, DatabaseError> {
        let statement = insert_statement(self.dialect(), table, values);
        tracing::debug!(table = %table, sql = %statement.sql, "insert");
        self.database.execute(statement).await
    }

    /// Invoke a procedure taken from the catalog's procedure list
    pub async fn call(&self, procedure: &ProcedureDescriptor, arguments: &[BoundValue]) -> Result<u64, DatabaseError> {
        let statement = call_statement(self.dialect(), procedure, arguments);
        tracing::debug!(procedure = %procedure.name, sql = %statement.sql, "call");
        self.database.execute(statement).await
    }

    /// Stream the filtered rows, unordered, optionally capped
    pub fn export(&self, table: &TableDescriptor, predicates: &[Predicate], limit: Option<u64>) -> RowStream {
        let statement = select_statement(self.dialect(), table, predicates, RowOrder::Unordered, limit, None);
        tracing::debug!(table = %table.name, sql = %statement.sql, "export");
        self.database.stream(statement)
    }
}

/// Values echoed back after a successful insert, keyed by column
pub fn inserted_values(values: &[BoundValue]) -> serde_json::Map<String, serde_json::Value> {
    values
        .iter()
        .map(|bound| (bound.name.clone(), bound.value.to_json()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::statement::SqlValue;
    use crate::filter::tests::{column, table};
    use crate::filter::ColumnRef;
    use crate::schema::{ParameterDescriptor, SemanticType};

    fn parameter(name: &str, semantic_type: SemanticType, mode: ParameterMode) -> ParameterDescriptor {
        ParameterDescriptor {
            name: name.to_string(),
            data_type: "integer".to_string(),
            semantic_type,
            mode,
            cast_type: Some("\"pg_catalog\".\"int4\"".to_string()),
            reference: None,
        }
    }

    fn leader_transfer() -> ProcedureDescriptor {
        ProcedureDescriptor {
            schema: "public".to_string(),
            name: "leader_transfer".to_string(),
            specific_name: "leader_transfer_16420".to_string(),
            parameters: vec![
                parameter("new_leader_id", SemanticType::Integer, ParameterMode::In),
                parameter("target_id", SemanticType::Integer, ParameterMode::In),
                parameter("note", SemanticType::Text, ParameterMode::In),
                parameter("moved", SemanticType::Integer, ParameterMode::Out),
            ],
        }
    }

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    #[test]
    fn test_select_orders_by_every_primary_key_column() {
        let memberships = table(
            vec![
                column("person_id", SemanticType::Integer),
                column("club_id", SemanticType::Integer),
            ],
            &["person_id", "club_id"],
        );
        let statement = select_statement(
            Dialect::SQLITE,
            &memberships,
            &[],
            RowOrder::LatestFirst,
            Some(50),
            Some(0),
        );
        assert_eq!(
            statement.sql,
            "SELECT * FROM \"public\".\"things\" ORDER BY \"person_id\" DESC, \"club_id\" DESC LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn test_select_without_ordering_or_limit() {
        let notes = table(vec![column("body", SemanticType::Text)], &[]);
        let predicates = vec![Predicate::IsNotNull { column: "body".into() }];
        let statement = select_statement(Dialect::POSTGRES, &notes, &predicates, RowOrder::LatestFirst, None, None);
        assert_eq!(statement.sql, "SELECT * FROM \"public\".\"things\" WHERE \"body\" IS NOT NULL");
        assert!(statement.values.is_empty());
    }

    #[test]
    fn test_count_statement_shares_filters() {
        let events = table(vec![column("at", SemanticType::DateTime)], &[]);
        let predicates = vec![Predicate::AtLeast {
            column: ColumnRef { name: "at".into(), cast_type: None },
            value: "2024-01-01".into(),
        }];
        let statement = count_statement(Dialect::SQLITE, &events, &predicates);
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"public\".\"things\" WHERE \"at\" >= ?"
        );
    }

    #[test]
    fn test_insert_statement() {
        let name = TableName::new("public", "investors");
        let values = vec![
            BoundValue {
                name: "email".into(),
                value: SqlValue::Text("ann@example.com".into()),
                cast_type: Some("\"pg_catalog\".\"varchar\"".into()),
            },
            BoundValue {
                name: "joined_on".into(),
                value: SqlValue::Null,
                cast_type: Some("\"pg_catalog\".\"date\"".into()),
            },
        ];
        let statement = insert_statement(Dialect::POSTGRES, &name, &values);
        assert_eq!(
            statement.sql,
            "INSERT INTO \"public\".\"investors\" (\"email\", \"joined_on\") VALUES \
             (CAST($1 AS \"pg_catalog\".\"varchar\"), CAST($2 AS \"pg_catalog\".\"date\"))"
        );

        let empty = insert_statement(Dialect::SQLITE, &name, &[]);
        assert_eq!(empty.sql, "INSERT INTO \"public\".\"investors\" DEFAULT VALUES");
    }

    #[test]
    fn test_call_statement_uses_named_notation() {
        let procedure = leader_transfer();
        let arguments = coerce_arguments(&procedure, &form(&[("target_id", "9"), ("new_leader_id", "4")]))
            .unwrap()
            .unwrap();
        let statement = call_statement(Dialect::POSTGRES, &procedure, &arguments);
        assert_eq!(
            statement.sql,
            "CALL \"public\".\"leader_transfer\"(\"new_leader_id\" => CAST($1 AS \"pg_catalog\".\"int4\"), \
             \"target_id\" => CAST($2 AS \"pg_catalog\".\"int4\"), \"moved\" => NULL)"
        );
        assert_eq!(statement.values, vec![SqlValue::Integer(4), SqlValue::Integer(9)]);
    }

    #[test]
    fn test_undeclared_argument_is_rejected() {
        let procedure = leader_transfer();
        let result = coerce_arguments(&procedure, &form(&[("target_id", "1"), ("drop_table", "x")]));
        assert!(matches!(result, Err(DatabaseError::Query(message)) if message.contains("drop_table")));
    }

    #[test]
    fn test_empty_argument_name_is_rejected() {
        let mut procedure = leader_transfer();
        procedure
            .parameters
            .push(parameter("", SemanticType::Integer, ParameterMode::In));
        let result = coerce_arguments(&procedure, &form(&[("target_id", "1"), ("", "5")]));
        assert!(matches!(result, Err(DatabaseError::Query(message)) if message.contains("\"\"")));
    }

    #[test]
    fn test_argument_coercion_errors_are_per_parameter() {
        let procedure = leader_transfer();
        let errors = coerce_arguments(&procedure, &form(&[("target_id", "nine"), ("new_leader_id", "x")]))
            .unwrap()
            .unwrap_err();
        assert_eq!(errors.fields.len(), 2);
        assert!(errors.fields["target_id"].starts_with("Invalid value: "));
    }

    #[test]
    fn test_inserted_values_skip_omitted_columns() {
        let values = vec![BoundValue {
            name: "email".into(),
            value: SqlValue::Text("a@b.c".into()),
            cast_type: None,
        }];
        let echoed = inserted_values(&values);
        assert_eq!(echoed.len(), 1);
        assert!(!echoed.contains_key("investor_id"));
    }

    #[test]
    fn test_count_from_row() {
        assert_eq!(count_from_row(&serde_json::json!({"count": 12})), 12);
        assert_eq!(count_from_row(&serde_json::json!({"count": "7"})), 7);
        assert_eq!(count_from_row(&serde_json::json!({})), 0);
    }
}
