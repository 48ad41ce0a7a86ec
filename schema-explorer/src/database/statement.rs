//! Parameterized statement construction
//!
//! Identifiers come from live metadata and are quoted; every caller supplied
//! value is bound through a placeholder. Dialect differences (placeholder
//! style, case-insensitive matching, casts) are isolated in [`Dialect`].

use crate::filter::Predicate;
use crate::schema::{LabelColumn, TableName};

/// A value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// JSON rendering used when echoing bound values back to callers
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Bool(value) => serde_json::Value::Bool(*value),
            SqlValue::Integer(value) => serde_json::Value::Number((*value).into()),
            SqlValue::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(value) => serde_json::Value::String(value.clone()),
            SqlValue::Json(value) => value.clone(),
            SqlValue::Bytes(bytes) => {
                serde_json::Value::String(format!("[BLOB: {} bytes]", bytes.len()))
            }
        }
    }
}

/// SQL text plus the values for its placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Numbered,
    /// `?`
    Positional,
}

/// Per-store SQL spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    placeholders: PlaceholderStyle,
    case_insensitive_like: &'static str,
    /// Wrap placeholders in `CAST(.. AS type)` when the target type is known
    casts_parameters: bool,
    composite_label: CompositeLabel,
    day_truncation: DayTruncation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompositeLabel {
    Concat,
    Pipes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayTruncation {
    DateTrunc,
    DateFunction,
}

impl Dialect {
    pub const POSTGRES: Dialect = Dialect {
        placeholders: PlaceholderStyle::Numbered,
        case_insensitive_like: "ILIKE",
        casts_parameters: true,
        composite_label: CompositeLabel::Concat,
        day_truncation: DayTruncation::DateTrunc,
    };

    pub const SQLITE: Dialect = Dialect {
        placeholders: PlaceholderStyle::Positional,
        case_insensitive_like: "LIKE",
        casts_parameters: false,
        composite_label: CompositeLabel::Pipes,
        day_truncation: DayTruncation::DateFunction,
    };

    /// Quote an identifier to prevent SQL injection
    ///
    /// Embedded double quotes are escaped by doubling them.
    pub fn quote_identifier(identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// `"schema"."table"`
    pub fn qualified_table(table: &TableName) -> String {
        format!(
            "{}.{}",
            Self::quote_identifier(&table.schema),
            Self::quote_identifier(&table.name)
        )
    }

    fn placeholder(&self, index: usize) -> String {
        match self.placeholders {
            PlaceholderStyle::Numbered => format!("${}", index),
            PlaceholderStyle::Positional => "?".to_string(),
        }
    }

    /// Expression producing the display label for an options query
    pub fn label_expression(&self, label: &LabelColumn) -> String {
        match label {
            LabelColumn::Single(column) => Self::quote_identifier(column),
            LabelColumn::Composite { first, second } => {
                let first = Self::quote_identifier(first);
                let second = Self::quote_identifier(second);
                match self.composite_label {
                    CompositeLabel::Concat => format!("concat({}, ' ', {})", first, second),
                    CompositeLabel::Pipes => format!(
                        "(coalesce({}, '') || ' ' || coalesce({}, ''))",
                        first, second
                    ),
                }
            }
        }
    }

    /// Expression truncating a date/time column to its calendar day
    pub fn day_expression(&self, column: &str) -> String {
        let column = Self::quote_identifier(column);
        match self.day_truncation {
            DayTruncation::DateTrunc => format!("CAST(date_trunc('day', {}) AS date)", column),
            DayTruncation::DateFunction => format!("date({})", column),
        }
    }
}

/// Incrementally builds a [`Statement`], numbering placeholders as values are pushed
#[derive(Debug)]
pub struct StatementBuilder {
    dialect: Dialect,
    sql: String,
    values: Vec<SqlValue>,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            values: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn push_identifier(&mut self, identifier: &str) -> &mut Self {
        self.sql.push_str(&Dialect::quote_identifier(identifier));
        self
    }

    pub fn push_table(&mut self, table: &TableName) -> &mut Self {
        self.sql.push_str(&Dialect::qualified_table(table));
        self
    }

    /// Bind a value, optionally cast to the target column's store type
    pub fn push_value(&mut self, value: SqlValue, cast_type: Option<&str>) -> &mut Self {
        self.values.push(value);
        let placeholder = self.dialect.placeholder(self.values.len());
        match cast_type {
            Some(cast_type) if self.dialect.casts_parameters => {
                self.sql
                    .push_str(&format!("CAST({} AS {})", placeholder, cast_type));
            }
            _ => self.sql.push_str(&placeholder),
        }
        self
    }

    /// Append ` WHERE p1 AND p2 ...`, or nothing for an empty predicate list
    pub fn push_where(&mut self, predicates: &[Predicate]) -> &mut Self {
        for (index, predicate) in predicates.iter().enumerate() {
            self.push_sql(if index == 0 { " WHERE " } else { " AND " });
            self.push_predicate(predicate);
        }
        self
    }

    fn push_predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::AnyContains { columns, pattern } => {
                let like = self.dialect.case_insensitive_like;
                self.push_sql("(");
                for (index, column) in columns.iter().enumerate() {
                    if index > 0 {
                        self.push_sql(" OR ");
                    }
                    self.push_identifier(column);
                    self.push_sql(&format!(" {} ", like));
                    self.push_value(SqlValue::Text(pattern.clone()), None);
                }
                self.push_sql(")");
            }
            Predicate::AtLeast { column, value } => {
                self.push_identifier(&column.name);
                self.push_sql(" >= ");
                self.push_value(SqlValue::Text(value.clone()), column.cast_type.as_deref());
            }
            Predicate::AtMost { column, value } => {
                self.push_identifier(&column.name);
                self.push_sql(" <= ");
                self.push_value(SqlValue::Text(value.clone()), column.cast_type.as_deref());
            }
            Predicate::OnDay { column, day } => {
                let day_expression = self.dialect.day_expression(&column.name);
                self.push_sql(&day_expression);
                self.push_sql(" = ");
                let cast = if self.dialect.casts_parameters { Some("date") } else { None };
                self.push_value(SqlValue::Text(day.clone()), cast);
            }
            Predicate::IsNotNull { column } => {
                self.push_identifier(column);
                self.push_sql(" IS NOT NULL");
            }
        }
    }

    /// Append ` LIMIT n [OFFSET m]` with both bound
    pub fn push_limit(&mut self, limit: u64, offset: Option<u64>) -> &mut Self {
        self.push_sql(" LIMIT ");
        self.push_value(SqlValue::Integer(clamp_i64(limit)), None);
        if let Some(offset) = offset {
            self.push_sql(" OFFSET ");
            self.push_value(SqlValue::Integer(clamp_i64(offset)), None);
        }
        self
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            values: self.values,
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ColumnRef;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::quote_identifier("table\"name"), "\"table\"\"name\"");
        assert_eq!(
            Dialect::qualified_table(&TableName::new("public", "investors")),
            "\"public\".\"investors\""
        );
    }

    #[test]
    fn test_postgres_placeholders_are_numbered_and_cast() {
        let mut builder = StatementBuilder::new(Dialect::POSTGRES);
        builder
            .push_sql("SELECT * FROM t WHERE a = ")
            .push_value(SqlValue::Integer(1), Some("\"pg_catalog\".\"int4\""))
            .push_sql(" AND b = ")
            .push_value(SqlValue::Text("x".into()), None);
        let statement = builder.build();
        assert_eq!(
            statement.sql,
            "SELECT * FROM t WHERE a = CAST($1 AS \"pg_catalog\".\"int4\") AND b = $2"
        );
        assert_eq!(statement.values.len(), 2);
    }

    #[test]
    fn test_sqlite_placeholders_ignore_casts() {
        let mut builder = StatementBuilder::new(Dialect::SQLITE);
        builder
            .push_sql("SELECT 1 WHERE ")
            .push_value(SqlValue::Integer(1), Some("integer"));
        assert_eq!(builder.build().sql, "SELECT 1 WHERE ?");
    }

    #[test]
    fn test_push_where_renders_text_search_and_date_range() {
        let predicates = vec![
            Predicate::AnyContains {
                columns: vec!["name".into(), "email".into()],
                pattern: "%ann%".into(),
            },
            Predicate::AtLeast {
                column: ColumnRef {
                    name: "created_at".into(),
                    cast_type: Some("\"pg_catalog\".\"timestamptz\"".into()),
                },
                value: "2024-01-01".into(),
            },
        ];
        let mut builder = StatementBuilder::new(Dialect::POSTGRES);
        builder.push_sql("SELECT *").push_where(&predicates);
        let statement = builder.build();
        assert_eq!(
            statement.sql,
            "SELECT * WHERE (\"name\" ILIKE $1 OR \"email\" ILIKE $2) AND \"created_at\" >= CAST($3 AS \"pg_catalog\".\"timestamptz\")"
        );
        assert_eq!(statement.values[0], SqlValue::Text("%ann%".into()));
        assert_eq!(statement.values[2], SqlValue::Text("2024-01-01".into()));
    }

    #[test]
    fn test_push_where_empty_is_noop() {
        let mut builder = StatementBuilder::new(Dialect::SQLITE);
        builder.push_sql("SELECT *").push_where(&[]);
        assert_eq!(builder.build().sql, "SELECT *");
    }

    #[test]
    fn test_label_expression_per_dialect() {
        let label = LabelColumn::Composite {
            first: "first_name".into(),
            second: "last_name".into(),
        };
        assert_eq!(
            Dialect::POSTGRES.label_expression(&label),
            "concat(\"first_name\", ' ', \"last_name\")"
        );
        assert_eq!(
            Dialect::SQLITE.label_expression(&label),
            "(coalesce(\"first_name\", '') || ' ' || coalesce(\"last_name\", ''))"
        );
    }

    #[test]
    fn test_limit_and_offset_are_bound() {
        let mut builder = StatementBuilder::new(Dialect::POSTGRES);
        builder.push_sql("SELECT 1").push_limit(50, Some(100));
        let statement = builder.build();
        assert_eq!(statement.sql, "SELECT 1 LIMIT $1 OFFSET $2");
        assert_eq!(
            statement.values,
            vec![SqlValue::Integer(50), SqlValue::Integer(100)]
        );
    }
}
