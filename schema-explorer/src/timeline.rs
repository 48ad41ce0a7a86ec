//! Date-axis view: per-day row counts plus the rows of one day

use crate::database::statement::{Dialect, Statement, StatementBuilder};
use crate::database::traits::{DatabaseError, DatabaseProvider};
use crate::filter::{parse_day, require_date_column, text_search, ColumnRef, Predicate};
use crate::schema::{ColumnDescriptor, DayBucket, TableDescriptor, Timeline, TimelineQuery};

/// `SELECT day, COUNT(*) ... GROUP BY 1 ORDER BY 1 DESC LIMIT days`
///
/// Rows with a NULL date fall outside every bucket.
pub fn buckets_statement(
    dialect: Dialect,
    table: &TableDescriptor,
    date_column: &ColumnDescriptor,
    search: Option<Predicate>,
    days: u64,
) -> Statement {
    let day = dialect.day_expression(&date_column.name);
    let mut predicates = vec![Predicate::IsNotNull {
        column: date_column.name.clone(),
    }];
    predicates.extend(search);

    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("SELECT ")
        .push_sql(&day)
        .push_sql(" AS \"day\", COUNT(*) AS \"count\" FROM ")
        .push_table(&table.name)
        .push_where(&predicates)
        .push_sql(" GROUP BY 1 ORDER BY 1 DESC")
        .push_limit(days, None);
    builder.build()
}

/// Rows whose date falls on `day`, newest first
pub fn day_rows_statement(
    dialect: Dialect,
    table: &TableDescriptor,
    date_column: &ColumnDescriptor,
    day: &str,
    search: Option<Predicate>,
    limit: u64,
) -> Statement {
    let mut predicates = vec![Predicate::OnDay {
        column: ColumnRef::from(date_column),
        day: day.to_string(),
    }];
    predicates.extend(search);

    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("SELECT * FROM ")
        .push_table(&table.name)
        .push_where(&predicates)
        .push_sql(" ORDER BY ")
        .push_identifier(&date_column.name)
        .push_sql(" DESC")
        .push_limit(limit, None);
    builder.build()
}

fn bucket_from_row(row: &serde_json::Value) -> Option<DayBucket> {
    let day = match row.get("day")? {
        serde_json::Value::String(day) => day.clone(),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    let count = row.get("count").and_then(serde_json::Value::as_u64).unwrap_or(0);
    Some(DayBucket { day, count })
}

/// Builds [`Timeline`]s for a provider
pub struct TimelineBuilder<'a, DB: DatabaseProvider> {
    database: &'a DB,
    days: u64,
    rows: u64,
}

impl<'a, DB: DatabaseProvider> TimelineBuilder<'a, DB> {
    pub fn new(database: &'a DB, days: u64, rows: u64) -> Self {
        Self { database, days, rows }
    }

    /// # Errors
    ///
    /// [`DatabaseError::Query`] when the table has no date/time column or the
    /// requested day is not a `YYYY-MM-DD` date.
    pub async fn build(&self, table: &TableDescriptor, query: &TimelineQuery) -> Result<Timeline, DatabaseError> {
        let requested = query.date_col.as_deref().filter(|name| !name.is_empty());
        let date_column = require_date_column(table, requested)?;
        let requested_day = query.day.clone().filter(|day| !day.is_empty());
        if let Some(day) = &requested_day {
            parse_day("day", day)?;
        }
        let search = query.q.as_deref().filter(|q| !q.is_empty());
        let dialect = self.database.dialect();

        let statement = buckets_statement(dialect, table, date_column, text_search(table, search), self.days);
        let buckets: Vec<DayBucket> = self
            .database
            .fetch_all(statement)
            .await?
            .iter()
            .filter_map(bucket_from_row)
            .collect();

        let selected_day = requested_day.or_else(|| buckets.first().map(|bucket| bucket.day.clone()));

        let rows = match &selected_day {
            Some(day) => {
                let statement = day_rows_statement(
                    dialect,
                    table,
                    date_column,
                    day,
                    text_search(table, search),
                    self.rows,
                );
                self.database.fetch_all(statement).await?
            }
            None => Vec::new(),
        };

        Ok(Timeline {
            table: table.name.clone(),
            date_column: date_column.name.clone(),
            buckets,
            selected_day,
            columns: table.column_names(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::statement::SqlValue;
    use crate::filter::tests::{column, table};
    use crate::schema::SemanticType;

    fn events() -> TableDescriptor {
        let mut events = table(
            vec![
                column("id", SemanticType::Integer),
                column("title", SemanticType::Text),
                column("happened_at", SemanticType::DateTime),
            ],
            &["id"],
        );
        events.columns[2].cast_type = Some("\"pg_catalog\".\"timestamptz\"".into());
        events
    }

    #[test]
    fn test_buckets_statement_postgres() {
        let events = events();
        let search = text_search(&events, Some("launch"));
        let statement = buckets_statement(Dialect::POSTGRES, &events, &events.columns[2], search, 60);
        assert_eq!(
            statement.sql,
            "SELECT CAST(date_trunc('day', \"happened_at\") AS date) AS \"day\", COUNT(*) AS \"count\" \
             FROM \"public\".\"things\" WHERE \"happened_at\" IS NOT NULL AND (\"title\" ILIKE $1) \
             GROUP BY 1 ORDER BY 1 DESC LIMIT $2"
        );
        assert_eq!(
            statement.values,
            vec![SqlValue::Text("%launch%".into()), SqlValue::Integer(60)]
        );
    }

    #[test]
    fn test_day_rows_statement_sqlite() {
        let events = events();
        let statement = day_rows_statement(Dialect::SQLITE, &events, &events.columns[2], "2024-05-01", None, 200);
        assert_eq!(
            statement.sql,
            "SELECT * FROM \"public\".\"things\" WHERE date(\"happened_at\") = ? \
             ORDER BY \"happened_at\" DESC LIMIT ?"
        );
        assert_eq!(statement.values[0], SqlValue::Text("2024-05-01".into()));
    }

    #[test]
    fn test_day_rows_statement_postgres_casts_day() {
        let events = events();
        let statement = day_rows_statement(Dialect::POSTGRES, &events, &events.columns[2], "2024-05-01", None, 200);
        assert!(statement
            .sql
            .contains("CAST(date_trunc('day', \"happened_at\") AS date) = CAST($1 AS date)"));
    }

    #[test]
    fn test_bucket_from_row() {
        assert_eq!(
            bucket_from_row(&serde_json::json!({"day": "2024-05-01", "count": 3})),
            Some(DayBucket { day: "2024-05-01".into(), count: 3 })
        );
        assert_eq!(bucket_from_row(&serde_json::json!({"day": null, "count": 3})), None);
    }
}
