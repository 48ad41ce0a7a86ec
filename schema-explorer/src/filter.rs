//! Browse filters
//!
//! Filters are structured predicates built from a [`TableDescriptor`]; each
//! dialect renders them with bound placeholders (see
//! [`StatementBuilder::push_where`](crate::database::statement::StatementBuilder::push_where)).

use crate::database::traits::DatabaseError;
use crate::schema::{ColumnDescriptor, FilterRequest, TableDescriptor};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime};

/// A column plus the store type bound values are cast to when compared with it
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub name: String,
    pub cast_type: Option<String>,
}

impl From<&ColumnDescriptor> for ColumnRef {
    fn from(column: &ColumnDescriptor) -> Self {
        Self {
            name: column.name.clone(),
            cast_type: column.cast_type.clone(),
        }
    }
}

/// One conjunct of a WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Case-insensitive `LIKE pattern` OR-combined across columns
    AnyContains { columns: Vec<String>, pattern: String },
    /// `column >= value`
    AtLeast { column: ColumnRef, value: String },
    /// `column <= value`
    AtMost { column: ColumnRef, value: String },
    /// Column's calendar day equals `day`
    OnDay { column: ColumnRef, day: String },
    IsNotNull { column: String },
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Substring match across every text-typed column
///
/// Returns `None` when no query is supplied or the table has no text columns.
pub fn text_search(table: &TableDescriptor, query: Option<&str>) -> Option<Predicate> {
    let query = query.filter(|query| !query.is_empty())?;
    let columns: Vec<String> = table.text_columns().map(|column| column.name.clone()).collect();
    if columns.is_empty() {
        return None;
    }
    Some(Predicate::AnyContains {
        columns,
        pattern: format!("%{}%", query),
    })
}

/// The requested date/time column if it exists and is date-typed, else the first date-typed column
pub fn date_column<'a>(
    table: &'a TableDescriptor,
    requested: Option<&str>,
) -> Option<&'a ColumnDescriptor> {
    requested
        .and_then(|name| table.column(name))
        .filter(|column| column.semantic_type.is_date())
        .or_else(|| table.columns.iter().find(|column| column.semantic_type.is_date()))
}

/// Like [`date_column`], but a missing date axis is an error
///
/// Used by views that cannot exist without one, such as the timeline.
pub fn require_date_column<'a>(
    table: &'a TableDescriptor,
    requested: Option<&str>,
) -> Result<&'a ColumnDescriptor, DatabaseError> {
    date_column(table, requested).ok_or_else(|| {
        DatabaseError::Query(format!(
            "No date/datetime column found in {}. Provide dateCol.",
            table.name
        ))
    })
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Check that `value` is a calendar day (`YYYY-MM-DD`)
pub fn parse_day(field: &str, value: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| DatabaseError::Query(format!("{} must be a date (YYYY-MM-DD), got '{}'", field, value)))
}

/// Check that `value` is a date, a local date-time or an RFC 3339 timestamp
///
/// The value is still bound as supplied; the store does the comparison.
pub fn parse_date_bound(field: &str, value: &str) -> Result<(), DatabaseError> {
    let valid = NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || DATE_TIME_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(value, format).is_ok())
        || DateTime::parse_from_rfc3339(value).is_ok();
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::Query(format!(
            "{} must be a date or date-time, got '{}'",
            field, value
        )))
    }
}

/// Build the conjunctive predicate list for a browse or export
///
/// The date range is dropped silently when the table has no date/time column.
///
/// # Errors
///
/// [`DatabaseError::Query`] when a supplied date bound does not parse.
pub fn build_filters(table: &TableDescriptor, request: &FilterRequest) -> Result<Vec<Predicate>, DatabaseError> {
    let mut predicates = Vec::new();

    if let Some(predicate) = text_search(table, supplied(&request.q)) {
        predicates.push(predicate);
    }

    let date_from = supplied(&request.date_from);
    let date_to = supplied(&request.date_to);
    if let Some(value) = date_from {
        parse_date_bound("dateFrom", value)?;
    }
    if let Some(value) = date_to {
        parse_date_bound("dateTo", value)?;
    }
    if date_from.is_some() || date_to.is_some() {
        if let Some(column) = date_column(table, supplied(&request.date_col)) {
            if let Some(value) = date_from {
                predicates.push(Predicate::AtLeast {
                    column: column.into(),
                    value: value.to_string(),
                });
            }
            if let Some(value) = date_to {
                predicates.push(Predicate::AtMost {
                    column: column.into(),
                    value: value.to_string(),
                });
            }
        }
    }

    Ok(predicates)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{SemanticType, TableName};
    use std::collections::BTreeMap;

    pub(crate) fn column(name: &str, semantic_type: SemanticType) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: format!("{:?}", semantic_type).to_lowercase(),
            semantic_type,
            nullable: true,
            default_value: None,
            is_primary_key: false,
            is_generated: false,
            cast_type: None,
        }
    }

    pub(crate) fn table(columns: Vec<ColumnDescriptor>, primary_key: &[&str]) -> TableDescriptor {
        let primary_key: Vec<String> = primary_key.iter().map(|name| name.to_string()).collect();
        let columns = columns
            .into_iter()
            .map(|mut column| {
                column.is_primary_key = primary_key.contains(&column.name);
                column
            })
            .collect();
        TableDescriptor {
            name: TableName::new("public", "things"),
            columns,
            primary_key,
            foreign_keys: BTreeMap::new(),
        }
    }

    fn request(q: Option<&str>, from: Option<&str>, to: Option<&str>, col: Option<&str>) -> FilterRequest {
        FilterRequest {
            q: q.map(String::from),
            date_from: from.map(String::from),
            date_to: to.map(String::from),
            date_col: col.map(String::from),
        }
    }

    #[test]
    fn test_text_search_covers_every_text_column() {
        let table = table(
            vec![
                column("id", SemanticType::Integer),
                column("name", SemanticType::Text),
                column("email", SemanticType::Text),
            ],
            &["id"],
        );
        let predicates = build_filters(&table, &request(Some("ann"), None, None, None)).unwrap();
        assert_eq!(
            predicates,
            vec![Predicate::AnyContains {
                columns: vec!["name".into(), "email".into()],
                pattern: "%ann%".into(),
            }]
        );
    }

    #[test]
    fn test_text_search_omitted_without_text_columns() {
        let table = table(vec![column("id", SemanticType::Integer)], &["id"]);
        assert!(build_filters(&table, &request(Some("ann"), None, None, None)).unwrap().is_empty());
    }

    #[test]
    fn test_date_range_prefers_requested_column() {
        let table = table(
            vec![
                column("created_at", SemanticType::DateTime),
                column("updated_at", SemanticType::DateTime),
            ],
            &[],
        );
        let predicates = build_filters(
            &table,
            &request(None, Some("2024-01-01"), Some("2024-02-01"), Some("updated_at")),
        )
        .unwrap();
        assert_eq!(predicates.len(), 2);
        match &predicates[0] {
            Predicate::AtLeast { column, value } => {
                assert_eq!(column.name, "updated_at");
                assert_eq!(value, "2024-01-01");
            }
            other => panic!("unexpected predicate {:?}", other),
        }
        assert!(matches!(&predicates[1], Predicate::AtMost { column, .. } if column.name == "updated_at"));
    }

    #[test]
    fn test_requested_non_date_column_falls_back_to_first_date_column() {
        let table = table(
            vec![
                column("title", SemanticType::Text),
                column("published_on", SemanticType::DateTime),
            ],
            &[],
        );
        let predicates = build_filters(&table, &request(None, None, Some("2024-02-01"), Some("title"))).unwrap();
        assert!(matches!(&predicates[0], Predicate::AtMost { column, .. } if column.name == "published_on"));
    }

    #[test]
    fn test_date_range_silently_omitted_without_date_column() {
        let table = table(
            vec![column("id", SemanticType::Integer), column("name", SemanticType::Text)],
            &["id"],
        );
        let predicates = build_filters(&table, &request(Some("x"), Some("2024-01-01"), None, None)).unwrap();
        assert_eq!(predicates.len(), 1);
        assert!(matches!(predicates[0], Predicate::AnyContains { .. }));
    }

    #[test]
    fn test_require_date_column_fails_without_date_column() {
        let table = table(vec![column("name", SemanticType::Text)], &[]);
        assert!(matches!(require_date_column(&table, None), Err(DatabaseError::Query(_))));
    }

    #[test]
    fn test_blank_inputs_are_ignored() {
        let table = table(
            vec![column("name", SemanticType::Text), column("at", SemanticType::DateTime)],
            &[],
        );
        assert!(build_filters(&table, &request(Some(""), Some(""), Some(""), None)).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_date_bound_is_a_query_error() {
        let table = table(
            vec![column("name", SemanticType::Text), column("at", SemanticType::DateTime)],
            &[],
        );
        let result = build_filters(&table, &request(None, Some("not-a-date"), None, None));
        assert!(matches!(result, Err(DatabaseError::Query(message)) if message.contains("dateFrom")));
        let result = build_filters(&table, &request(None, None, Some("2024-13-40"), None));
        assert!(matches!(result, Err(DatabaseError::Query(message)) if message.contains("dateTo")));
    }

    #[test]
    fn test_date_bound_formats() {
        for value in [
            "2024-01-01",
            "2024-01-01T09:30",
            "2024-01-01T09:30:15",
            "2024-01-01 09:30:15.250",
            "2024-01-01T09:30:15+02:00",
            "2024-01-01T09:30:15Z",
        ] {
            assert!(parse_date_bound("dateFrom", value).is_ok(), "{} should parse", value);
        }
        assert!(parse_date_bound("dateFrom", "01/02/2024").is_err());
        assert!(parse_day("day", "2024-02-30").is_err());
        assert_eq!(parse_day("day", "2024-02-29").unwrap().to_string(), "2024-02-29");
    }
}
