//! Explorer service
//!
//! [`Explorer`] is the single entry point a presentation layer talks to. It
//! owns the catalog and the configuration and composes the filter, coercion,
//! execution, reference and cursor components per operation.

use crate::catalog::SchemaCatalog;
use crate::coerce::coerce_row;
use crate::config::ExplorerConfig;
use crate::constraint::map_violation;
use crate::cursor::ChangeCursor;
use crate::database::traits::{DatabaseError, DatabaseProvider};
use crate::executor::{coerce_arguments, inserted_values, QueryExecutor, RowOrder};
use crate::export::{csv_chunks, CsvExport};
use crate::filter::build_filters;
use crate::labels::OptionsFetcher;
use crate::relationships::RelationshipResolver;
use crate::schema::{
    BrowsePage, BrowseQuery, CallOutcome, ChangeSet, ExportQuery, InsertColumn, InsertForm,
    InsertOutcome, LabelColumn, ProcedureDescriptor, Reference, TableDescriptor, TableName,
    Timeline, TimelineQuery,
};
use crate::timeline::TimelineBuilder;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Explorer<DB: DatabaseProvider> {
    catalog: SchemaCatalog<DB>,
    config: Arc<ExplorerConfig>,
}

impl<DB: DatabaseProvider> Clone for Explorer<DB> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            config: self.config.clone(),
        }
    }
}

impl<DB: DatabaseProvider> Explorer<DB> {
    pub fn new(database: Arc<DB>, config: ExplorerConfig) -> Self {
        Self {
            catalog: SchemaCatalog::new(database),
            config: Arc::new(config),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog<DB> {
        &self.catalog
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    fn database(&self) -> &DB {
        self.catalog.database()
    }

    fn options(&self) -> OptionsFetcher<'_, DB> {
        OptionsFetcher::new(self.database(), self.config.option_limit)
    }

    pub async fn tables(&self) -> Result<Vec<TableName>, DatabaseError> {
        self.catalog.list_tables().await
    }

    pub async fn views(&self) -> Result<Vec<String>, DatabaseError> {
        self.catalog.list_views().await
    }

    /// Procedures with inferred references and their option lists
    pub async fn procedures(&self) -> Result<Vec<ProcedureDescriptor>, DatabaseError> {
        let mut procedures = self.catalog.list_procedures().await?;
        if procedures.is_empty() {
            return Ok(procedures);
        }

        let table_keys = self.catalog.table_keys().await?;
        let resolver = RelationshipResolver::new(
            &self.config.overrides,
            &table_keys,
            self.database().default_schema(),
        );

        for procedure in &mut procedures {
            for parameter in &mut procedure.parameters {
                let Some(resolution) = resolver.resolve(&procedure.name, &parameter.name) else {
                    continue;
                };
                tracing::debug!(
                    procedure = %procedure.name,
                    parameter = %parameter.name,
                    table = %resolution.table,
                    source = ?resolution.source,
                    "Resolved parameter reference"
                );
                parameter.reference = self.load_reference(&resolution.table, None).await?;
            }
        }
        Ok(procedures)
    }

    /// Reference to `table` keyed by `id_column`, or by its first primary key column
    ///
    /// A referenced table that cannot be described is reported through
    /// `options_error` rather than failing the enclosing operation. Tables
    /// with no key to reference yield no reference at all.
    async fn load_reference(
        &self,
        table: &TableName,
        id_column: Option<&str>,
    ) -> Result<Option<Reference>, DatabaseError> {
        match self.catalog.describe_table(table).await {
            Ok(descriptor) => {
                let id_column = match id_column {
                    Some(column) => column.to_string(),
                    None => match descriptor.primary_key.first() {
                        Some(column) => column.clone(),
                        None => return Ok(None),
                    },
                };
                Ok(Some(self.options().reference(&descriptor, &id_column).await))
            }
            Err(DatabaseError::Connection(message)) => Err(DatabaseError::Connection(message)),
            Err(error) => {
                tracing::warn!(table = %table, error = %error, "Failed to describe referenced table");
                Ok(id_column.map(|id_column| Reference {
                    table: table.clone(),
                    id_column: id_column.to_string(),
                    label_column: LabelColumn::Single(id_column.to_string()),
                    options: Vec::new(),
                    options_error: Some(error.to_string()),
                }))
            }
        }
    }

    pub async fn describe(&self, table: &str) -> Result<TableDescriptor, DatabaseError> {
        self.catalog.describe_table(&self.catalog.parse_table(table)).await
    }

    /// One filtered page of rows plus the filtered total
    pub async fn browse(&self, table: &str, query: &BrowseQuery) -> Result<BrowsePage, DatabaseError> {
        let descriptor = self.describe(table).await?;
        let predicates = build_filters(&descriptor, &query.filter())?;
        let limit = self.config.page_size(query.limit);
        let page = query.page.max(1);
        let offset = (page - 1).saturating_mul(limit);

        let executor = QueryExecutor::new(self.database());
        let rows = executor
            .select(
                &descriptor,
                &predicates,
                RowOrder::from_latest_first(query.latest_first),
                limit,
                offset,
            )
            .await?;
        let total = executor.count(&descriptor, &predicates).await?;
        let has_more = offset + (rows.len() as u64) < total;

        Ok(BrowsePage {
            columns: descriptor.column_names(),
            table: descriptor,
            rows,
            page,
            limit,
            total,
            has_more,
        })
    }

    /// Insertable columns, with option lists for declared foreign keys
    pub async fn insert_form(&self, table: &str) -> Result<InsertForm, DatabaseError> {
        let descriptor = self.describe(table).await?;
        let mut columns = Vec::new();
        for column in descriptor.columns.iter().filter(|column| column.is_insertable()) {
            let reference = match descriptor.foreign_keys.get(&column.name) {
                Some(edge) => {
                    self.load_reference(&edge.references_table, Some(&edge.references_column))
                        .await?
                }
                None => None,
            };
            columns.push(InsertColumn {
                column: column.clone(),
                reference,
            });
        }
        Ok(InsertForm {
            table: descriptor.name,
            columns,
        })
    }

    /// Coerce and insert one row
    ///
    /// Coercion failures and constraint violations come back as
    /// [`InsertOutcome::Rejected`] with the submitted input; nothing is
    /// written in either case.
    pub async fn insert(
        &self,
        table: &str,
        form: HashMap<String, String>,
    ) -> Result<InsertOutcome, DatabaseError> {
        let descriptor = self.describe(table).await?;
        let insertable: Vec<_> = descriptor
            .columns
            .iter()
            .filter(|column| column.is_insertable())
            .cloned()
            .collect();

        let values = match coerce_row(&insertable, &form) {
            Ok(values) => values,
            Err(errors) => {
                return Ok(InsertOutcome::Rejected {
                    table: descriptor.name,
                    errors,
                    entered: form,
                })
            }
        };

        match QueryExecutor::new(self.database())
            .insert(&descriptor.name, &values)
            .await
        {
            Ok(_) => {
                tracing::info!(table = %descriptor.name, "Inserted row");
                Ok(InsertOutcome::Inserted {
                    table: descriptor.name,
                    values: inserted_values(&values),
                })
            }
            Err(DatabaseError::Constraint(violation)) => {
                tracing::debug!(table = %descriptor.name, kind = ?violation.kind, "Insert rejected by store");
                Ok(InsertOutcome::Rejected {
                    table: descriptor.name,
                    errors: map_violation(&violation),
                    entered: form,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Call a procedure from the live procedure list
    ///
    /// # Errors
    ///
    /// [`DatabaseError::UnknownProcedure`] when `name` is not a procedure of
    /// the default schema, [`DatabaseError::Query`] when the form names a
    /// parameter the procedure does not declare.
    pub async fn call_procedure(
        &self,
        name: &str,
        form: HashMap<String, String>,
    ) -> Result<CallOutcome, DatabaseError> {
        let procedure = self.catalog.procedure(name).await?;
        let arguments = match coerce_arguments(&procedure, &form)? {
            Ok(arguments) => arguments,
            Err(errors) => {
                return Ok(CallOutcome::Rejected {
                    procedure: procedure.name,
                    errors,
                    entered: form,
                })
            }
        };

        match QueryExecutor::new(self.database())
            .call(&procedure, &arguments)
            .await
        {
            Ok(_) => {
                tracing::info!(procedure = %procedure.name, "Called procedure");
                Ok(CallOutcome::Called {
                    message: format!("Procedure '{}' executed successfully.", procedure.name),
                    procedure: procedure.name,
                })
            }
            Err(DatabaseError::Constraint(violation)) => Ok(CallOutcome::Rejected {
                procedure: procedure.name,
                errors: map_violation(&violation),
                entered: form,
            }),
            Err(error) => Err(error),
        }
    }

    /// Rows inserted after the `after` primary key value
    pub async fn changes_since(
        &self,
        table: &str,
        after: Option<&str>,
        max_rows: Option<u64>,
    ) -> Result<ChangeSet, DatabaseError> {
        let descriptor = self.describe(table).await?;
        ChangeCursor::new(self.database())
            .changes_since(&descriptor, after, self.config.change_size(max_rows))
            .await
    }

    /// Stream the filtered table as CSV
    ///
    /// Only metadata is loaded up front; rows are read while the returned
    /// stream is consumed.
    pub async fn export(&self, table: &str, query: &ExportQuery) -> Result<CsvExport, DatabaseError> {
        let descriptor = self.describe(table).await?;
        let predicates = build_filters(&descriptor, &query.filter())?;
        let rows = QueryExecutor::new(self.database()).export(
            &descriptor,
            &predicates,
            self.config.export_size(query.limit),
        );
        Ok(CsvExport {
            chunks: csv_chunks(descriptor.column_names(), rows),
            table: descriptor.name,
        })
    }

    pub async fn timeline(&self, table: &str, query: &TimelineQuery) -> Result<Timeline, DatabaseError> {
        let descriptor = self.describe(table).await?;
        TimelineBuilder::new(self.database(), self.config.timeline_days, self.config.timeline_rows)
            .build(&descriptor, query)
            .await
    }

    pub async fn health(&self) -> Result<(), DatabaseError> {
        self.database().ping().await
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::database::sqlite::SqliteProvider;
    use crate::schema::SemanticType;
    use futures::StreamExt;
    use sqlx::sqlite::SqlitePoolOptions;

    const SCHEMA: &[&str] = &[
        "CREATE TABLE investors (
            investor_id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT,
            email TEXT UNIQUE,
            active BOOLEAN NOT NULL DEFAULT 0,
            joined_on DATE
        )",
        "CREATE TABLE companies (
            company_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT
        )",
        "CREATE TABLE investments (
            investment_id INTEGER PRIMARY KEY,
            investor_id INTEGER NOT NULL REFERENCES investors(investor_id),
            company_id INTEGER NOT NULL REFERENCES companies(company_id),
            amount REAL,
            invested_at DATETIME,
            UNIQUE (investor_id, company_id)
        )",
        "CREATE TABLE tags (label TEXT, weight INTEGER)",
        "CREATE TABLE memberships (
            investor_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            PRIMARY KEY (investor_id, company_id)
        )",
        "INSERT INTO investors (first_name, last_name, email, joined_on) VALUES
            ('Ann', 'Lee', 'ann@example.com', '2024-01-05'),
            ('Bo', 'Park', 'bo@example.com', '2024-02-11')",
        "INSERT INTO companies (name, description) VALUES ('Acme', 'Anvils'), ('Globex', 'Everything')",
        "INSERT INTO investments (investor_id, company_id, amount, invested_at) VALUES
            (1, 1, 100.0, '2024-03-01 09:00:00'),
            (1, 2, 50.0, '2024-03-01 17:30:00'),
            (2, 1, 75.0, '2024-03-04 12:00:00')",
        "INSERT INTO tags (label, weight) VALUES ('alpha', 1), ('beta', 2)",
    ];

    async fn explorer() -> Explorer<SqliteProvider> {
        explorer_with(&[]).await
    }

    async fn explorer_with(extra: &[&str]) -> Explorer<SqliteProvider> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for statement in SCHEMA.iter().chain(extra) {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        Explorer::new(Arc::new(SqliteProvider::new(pool)), ExplorerConfig::default())
    }

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    #[tokio::test]
    async fn test_catalog_introspection() {
        let explorer = explorer().await;
        let tables: Vec<String> = explorer.tables().await.unwrap().iter().map(ToString::to_string).collect();
        assert_eq!(
            tables,
            vec!["main.companies", "main.investments", "main.investors", "main.memberships", "main.tags"]
        );

        let investors = explorer.describe("investors").await.unwrap();
        assert_eq!(investors.primary_key, vec!["investor_id"]);
        let key = investors.column("investor_id").unwrap();
        assert!(key.is_primary_key && key.is_generated);
        assert_eq!(investors.column("joined_on").unwrap().semantic_type, SemanticType::DateTime);
        assert_eq!(investors.column("active").unwrap().semantic_type, SemanticType::Boolean);
        assert!(!investors.column("first_name").unwrap().nullable);

        let investments = explorer.describe("main.investments").await.unwrap();
        let edge = &investments.foreign_keys["company_id"];
        assert_eq!(edge.references_table, TableName::new("main", "companies"));
        assert_eq!(edge.references_column, "company_id");

        let memberships = explorer.describe("memberships").await.unwrap();
        assert_eq!(memberships.primary_key, vec!["investor_id", "company_id"]);

        assert!(matches!(
            explorer.describe("missing").await,
            Err(DatabaseError::TableNotFound(_))
        ));
        assert!(explorer.procedures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_browse_pages_latest_first_with_filters() {
        let explorer = explorer().await;
        let query = BrowseQuery {
            limit: Some(1),
            ..BrowseQuery::default()
        };
        let page = explorer.browse("investors", &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.has_more);
        assert_eq!(page.rows[0]["first_name"], "Bo");

        let query = BrowseQuery {
            q: Some("ANN".into()),
            ..BrowseQuery::default()
        };
        let page = explorer.browse("investors", &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0]["email"], "ann@example.com");

        let query = BrowseQuery {
            date_from: Some("2024-02-01".into()),
            ..BrowseQuery::default()
        };
        let page = explorer.browse("investors", &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0]["first_name"], "Bo");
    }

    #[tokio::test]
    async fn test_date_filter_omitted_but_timeline_fails_without_date_column() {
        let explorer = explorer().await;
        let query = BrowseQuery {
            q: Some("alp".into()),
            date_from: Some("2024-01-01".into()),
            date_to: Some("2024-12-31".into()),
            ..BrowseQuery::default()
        };
        let page = explorer.browse("tags", &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0]["label"], "alpha");

        let result = explorer.timeline("tags", &TimelineQuery::default()).await;
        assert!(matches!(result, Err(DatabaseError::Query(_))));
    }

    #[tokio::test]
    async fn test_insert_with_blank_primary_key() {
        let explorer = explorer().await;
        let outcome = explorer
            .insert(
                "investors",
                form(&[("investor_id", ""), ("first_name", "Cy"), ("email", "cy@example.com")]),
            )
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Inserted { table, values } => {
                assert_eq!(table, TableName::new("main", "investors"));
                assert!(!values.contains_key("investor_id"));
                assert_eq!(values["first_name"], "Cy");
                assert_eq!(values["active"], false);
                assert_eq!(values["last_name"], serde_json::Value::Null);
            }
            other => panic!("expected insert, got {:?}", other),
        }
        let page = explorer.browse("investors", &BrowseQuery::default()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows[0]["investor_id"], 3);
    }

    #[tokio::test]
    async fn test_insert_rejections() {
        let explorer = explorer().await;

        let outcome = explorer
            .insert("investments", form(&[("investor_id", "1"), ("company_id", "1"), ("amount", "5")]))
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Rejected { errors, entered, .. } => {
                assert!(errors.fields.is_empty());
                assert!(errors.global.unwrap().starts_with("Unique constraint violated"));
                assert_eq!(entered["amount"], "5");
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let outcome = explorer
            .insert("investors", form(&[("last_name", "Nobody")]))
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Rejected { errors, .. } => {
                assert_eq!(errors.fields["first_name"], "Required (NOT NULL).");
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let outcome = explorer
            .insert("investments", form(&[("investor_id", "one"), ("company_id", "x"), ("amount", "1.5")]))
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Rejected { errors, .. } => {
                assert_eq!(errors.fields.len(), 2);
                assert!(errors.fields["investor_id"].starts_with("Invalid value: "));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_form_offers_foreign_key_options() {
        let explorer = explorer().await;
        let form = explorer.insert_form("investments").await.unwrap();
        let names: Vec<&str> = form.columns.iter().map(|column| column.column.name.as_str()).collect();
        assert_eq!(names, vec!["investor_id", "company_id", "amount", "invested_at"]);

        let investor = form.columns[0].reference.as_ref().unwrap();
        assert_eq!(
            investor.label_column,
            LabelColumn::Composite {
                first: "first_name".into(),
                second: "last_name".into()
            }
        );
        let labels: Vec<&str> = investor.options.iter().map(|option| option.label.as_str()).collect();
        assert_eq!(labels, vec!["Ann Lee", "Bo Park"]);

        let company = form.columns[1].reference.as_ref().unwrap();
        assert_eq!(company.label_column, LabelColumn::Single("name".into()));
        assert_eq!(company.options[1].id, serde_json::json!(2));
        assert!(company.options_error.is_none());
    }

    #[tokio::test]
    async fn test_insert_form_survives_unreadable_reference() {
        let explorer = explorer_with(&[
            "CREATE TABLE pledges (
                pledge_id INTEGER PRIMARY KEY,
                fund_id INTEGER REFERENCES funds(fund_id),
                note TEXT
            )",
        ])
        .await;
        let insert_form = explorer.insert_form("pledges").await.unwrap();
        let names: Vec<&str> = insert_form
            .columns
            .iter()
            .map(|column| column.column.name.as_str())
            .collect();
        assert_eq!(names, vec!["fund_id", "note"]);

        let fund = insert_form.columns[0].reference.as_ref().unwrap();
        assert_eq!(fund.table, TableName::new("main", "funds"));
        assert_eq!(fund.id_column, "fund_id");
        assert!(fund.options.is_empty());
        assert!(fund.options_error.as_deref().unwrap().contains("funds"));
    }

    #[tokio::test]
    async fn test_malformed_filters_are_query_errors() {
        let explorer = explorer().await;
        let query = BrowseQuery {
            date_from: Some("not-a-date".into()),
            ..BrowseQuery::default()
        };
        assert!(matches!(
            explorer.browse("investors", &query).await,
            Err(DatabaseError::Query(_))
        ));

        let query = TimelineQuery {
            day: Some("2024-03".into()),
            ..TimelineQuery::default()
        };
        assert!(matches!(
            explorer.timeline("investments", &query).await,
            Err(DatabaseError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_changes_since() {
        let explorer = explorer().await;
        match explorer.changes_since("investments", Some("1"), None).await.unwrap() {
            ChangeSet::Rows { primary_key, rows } => {
                assert_eq!(primary_key, "investment_id");
                let ids: Vec<i64> = rows.iter().map(|row| row["investment_id"].as_i64().unwrap()).collect();
                assert_eq!(ids, vec![2, 3]);
            }
            other => panic!("expected rows, got {:?}", other),
        }
        assert!(matches!(
            explorer.changes_since("investments", None, None).await.unwrap(),
            ChangeSet::MissingCursor { .. }
        ));
        assert!(matches!(
            explorer.changes_since("memberships", Some("1"), None).await.unwrap(),
            ChangeSet::Unsupported { .. }
        ));
    }

    #[tokio::test]
    async fn test_export_streams_csv() {
        let explorer = explorer().await;
        let export = explorer.export("companies", &ExportQuery::default()).await.unwrap();
        assert_eq!(export.file_name(), "main_companies.csv");
        let chunks: Vec<Vec<u8>> = export.chunks.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            String::from_utf8(chunks.concat()).unwrap(),
            "company_id,name,description\n1,Acme,Anvils\n2,Globex,Everything\n"
        );
    }

    #[tokio::test]
    async fn test_export_of_empty_result_is_empty() {
        let explorer = explorer().await;
        let query = ExportQuery {
            q: Some("no such company".into()),
            ..ExportQuery::default()
        };
        let export = explorer.export("companies", &query).await.unwrap();
        let chunks: Vec<_> = export.chunks.collect().await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_timeline_buckets_and_selected_day() {
        let explorer = explorer().await;
        let timeline = explorer.timeline("investments", &TimelineQuery::default()).await.unwrap();
        assert_eq!(timeline.date_column, "invested_at");
        let buckets: Vec<(&str, u64)> = timeline
            .buckets
            .iter()
            .map(|bucket| (bucket.day.as_str(), bucket.count))
            .collect();
        assert_eq!(buckets, vec![("2024-03-04", 1), ("2024-03-01", 2)]);
        assert_eq!(timeline.selected_day.as_deref(), Some("2024-03-04"));
        assert_eq!(timeline.rows.len(), 1);

        let query = TimelineQuery {
            day: Some("2024-03-01".into()),
            ..TimelineQuery::default()
        };
        let timeline = explorer.timeline("investments", &query).await.unwrap();
        let ids: Vec<i64> = timeline.rows.iter().map(|row| row["investment_id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let explorer = explorer().await;
        let result = explorer.call_procedure("leader_transfer", HashMap::new()).await;
        assert!(matches!(result, Err(DatabaseError::UnknownProcedure(_))));
        explorer.health().await.unwrap();
    }
}
