//! Display labels and option lists for referenced tables

use crate::database::statement::{Dialect, Statement, StatementBuilder};
use crate::database::traits::{DatabaseError, DatabaseProvider};
use crate::schema::{LabelColumn, OptionEntry, Reference, TableDescriptor};

/// Name-like columns, most preferred first
pub const PREFERRED_LABEL_COLUMNS: [&str; 8] = [
    "name",
    "full_name",
    "title",
    "label",
    "display_name",
    "username",
    "email",
    "description",
];

/// Choose the column that best describes a row of `table` to a person
///
/// Only text columns are considered for the name-based choices. Matching is
/// case-insensitive; the column's own spelling is returned.
pub fn pick_label_column(table: &TableDescriptor) -> LabelColumn {
    let text_columns: Vec<&str> = table.text_columns().map(|column| column.name.as_str()).collect();
    let find = |wanted: &str| {
        text_columns
            .iter()
            .find(|name| name.eq_ignore_ascii_case(wanted))
            .map(|name| name.to_string())
    };

    if let (Some(first), Some(second)) = (find("first_name"), find("last_name")) {
        return LabelColumn::Composite { first, second };
    }

    if let Some(name) = PREFERRED_LABEL_COLUMNS.iter().find_map(|wanted| find(*wanted)) {
        return LabelColumn::Single(name);
    }

    let fallback = text_columns
        .first()
        .map(|name| name.to_string())
        .or_else(|| table.primary_key.first().cloned())
        .or_else(|| table.columns.first().map(|column| column.name.clone()))
        .unwrap_or_else(|| "id".to_string());
    LabelColumn::Single(fallback)
}

/// Bounded `(id, label)` select ordered by label
///
/// `None` when the id column or any label column does not exist on `table`;
/// such a reference has no options rather than a broken query.
pub fn options_statement(
    dialect: Dialect,
    table: &TableDescriptor,
    id_column: &str,
    label: &LabelColumn,
    limit: u64,
) -> Option<Statement> {
    table.column(id_column)?;
    match label {
        LabelColumn::Single(column) => {
            table.column(column)?;
        }
        LabelColumn::Composite { first, second } => {
            table.column(first)?;
            table.column(second)?;
        }
    }

    let label_expression = dialect.label_expression(label);
    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("SELECT ")
        .push_identifier(id_column)
        .push_sql(" AS \"id\", ")
        .push_sql(&label_expression)
        .push_sql(" AS \"label\" FROM ")
        .push_table(&table.name)
        .push_sql(" ORDER BY ")
        .push_sql(&label_expression)
        .push_sql(" ASC")
        .push_limit(limit, None);
    Some(builder.build())
}

fn label_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Loads candidate lists for references
pub struct OptionsFetcher<'a, DB: DatabaseProvider> {
    database: &'a DB,
    limit: u64,
}

impl<'a, DB: DatabaseProvider> OptionsFetcher<'a, DB> {
    pub fn new(database: &'a DB, limit: u64) -> Self {
        Self { database, limit }
    }

    /// Fetch up to `limit` options
    ///
    /// `Ok` with an empty list when the columns do not resolve; `Err` only
    /// when the store itself fails.
    pub async fn fetch(
        &self,
        table: &TableDescriptor,
        id_column: &str,
        label: &LabelColumn,
    ) -> Result<Vec<OptionEntry>, DatabaseError> {
        let Some(statement) =
            options_statement(self.database.dialect(), table, id_column, label, self.limit)
        else {
            return Ok(Vec::new());
        };

        let rows = self.database.fetch_all(statement).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| OptionEntry {
                id: row
                    .get_mut("id")
                    .map(serde_json::Value::take)
                    .unwrap_or(serde_json::Value::Null),
                label: row.get("label").map(label_text).unwrap_or_default(),
            })
            .collect())
    }

    /// Build a [`Reference`] to `table`, recording an option lookup failure
    /// instead of propagating it
    pub async fn reference(&self, table: &TableDescriptor, id_column: &str) -> Reference {
        let label_column = pick_label_column(table);
        let (options, options_error) = match self.fetch(table, id_column, &label_column).await {
            Ok(options) => (options, None),
            Err(error) => {
                tracing::warn!(table = %table.name, error = %error, "Failed to load reference options");
                (Vec::new(), Some(error.to_string()))
            }
        };
        Reference {
            table: table.name.clone(),
            id_column: id_column.to_string(),
            label_column,
            options,
            options_error,
        }
    }
}
