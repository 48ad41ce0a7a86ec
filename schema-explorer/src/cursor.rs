//! Polling for rows past a primary key watermark

use crate::coerce::coerce_single;
use crate::database::statement::{Dialect, SqlValue, Statement, StatementBuilder};
use crate::database::traits::{DatabaseError, DatabaseProvider};
use crate::schema::{ChangeSet, ColumnDescriptor, TableDescriptor};

pub const UNSUPPORTED_MESSAGE: &str = "Watching requires a single-column primary key.";
pub const MISSING_CURSOR_MESSAGE: &str = "Provide afterPk to watch for new rows.";

/// The column usable as a monotonic cursor, or the refusal to hand back
pub fn cursor_column(table: &TableDescriptor) -> Result<&ColumnDescriptor, ChangeSet> {
    table.single_primary_key().ok_or_else(|| ChangeSet::Unsupported {
        message: UNSUPPORTED_MESSAGE.to_string(),
    })
}

/// `SELECT * ... WHERE pk > after ORDER BY pk ASC LIMIT n`
pub fn changes_statement(
    dialect: Dialect,
    table: &TableDescriptor,
    primary_key: &ColumnDescriptor,
    after: SqlValue,
    limit: u64,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect);
    builder
        .push_sql("SELECT * FROM ")
        .push_table(&table.name)
        .push_sql(" WHERE ")
        .push_identifier(&primary_key.name)
        .push_sql(" > ")
        .push_value(after, primary_key.cast_type.as_deref())
        .push_sql(" ORDER BY ")
        .push_identifier(&primary_key.name)
        .push_sql(" ASC")
        .push_limit(limit, None);
    builder.build()
}

pub struct ChangeCursor<'a, DB: DatabaseProvider> {
    database: &'a DB,
}

impl<'a, DB: DatabaseProvider> ChangeCursor<'a, DB> {
    pub fn new(database: &'a DB) -> Self {
        Self { database }
    }

    /// Rows whose primary key is strictly greater than `after`, oldest first
    ///
    /// Tables without a single-column key and calls without a watermark get
    /// an explanatory [`ChangeSet`] instead of rows. The watermark is coerced
    /// like form input for the key column's type.
    pub async fn changes_since(
        &self,
        table: &TableDescriptor,
        after: Option<&str>,
        max_rows: u64,
    ) -> Result<ChangeSet, DatabaseError> {
        let primary_key = match cursor_column(table) {
            Ok(column) => column,
            Err(refusal) => return Ok(refusal),
        };

        let Some(after) = after.filter(|after| !after.is_empty()) else {
            return Ok(ChangeSet::MissingCursor {
                primary_key: primary_key.name.clone(),
                message: MISSING_CURSOR_MESSAGE.to_string(),
            });
        };

        let watermark = coerce_single(primary_key.semantic_type, after)
            .map_err(|error| DatabaseError::Query(format!("afterPk: {}", error)))?;

        let statement = changes_statement(
            self.database.dialect(),
            table,
            primary_key,
            watermark,
            max_rows,
        );
        let rows = self.database.fetch_all(statement).await?;

        Ok(ChangeSet::Rows {
            primary_key: primary_key.name.clone(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::{column, table};
    use crate::schema::SemanticType;

    #[test]
    fn test_composite_key_is_unsupported() {
        let memberships = table(
            vec![
                column("person_id", SemanticType::Integer),
                column("club_id", SemanticType::Integer),
            ],
            &["person_id", "club_id"],
        );
        match cursor_column(&memberships) {
            Err(ChangeSet::Unsupported { message }) => assert_eq!(message, UNSUPPORTED_MESSAGE),
            other => panic!("expected unsupported, got {:?}", other.map(|column| &column.name)),
        }

        let keyless = table(vec![column("note", SemanticType::Text)], &[]);
        assert!(cursor_column(&keyless).is_err());
    }

    #[test]
    fn test_changes_statement() {
        let mut events = table(
            vec![column("event_id", SemanticType::Integer), column("kind", SemanticType::Text)],
            &["event_id"],
        );
        events.columns[0].cast_type = Some("\"pg_catalog\".\"int8\"".to_string());
        let primary_key = cursor_column(&events).unwrap().clone();

        let statement = changes_statement(Dialect::POSTGRES, &events, &primary_key, SqlValue::Integer(41), 50);
        assert_eq!(
            statement.sql,
            "SELECT * FROM \"public\".\"things\" WHERE \"event_id\" > CAST($1 AS \"pg_catalog\".\"int8\") \
             ORDER BY \"event_id\" ASC LIMIT $2"
        );
        assert_eq!(statement.values, vec![SqlValue::Integer(41), SqlValue::Integer(50)]);

        let statement = changes_statement(Dialect::SQLITE, &events, &primary_key, SqlValue::Integer(41), 50);
        assert_eq!(
            statement.sql,
            "SELECT * FROM \"public\".\"things\" WHERE \"event_id\" > ? ORDER BY \"event_id\" ASC LIMIT ?"
        );
    }
}
