//! ExplorerLayer - Main Axum integration layer
//!
//! This module provides the main entry point for mounting the schema explorer
//! into an Axum application.

use crate::config::ExplorerConfig;
use crate::database::traits::DatabaseProvider;
use crate::explorer::Explorer;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[cfg(feature = "sqlite")]
use crate::database::sqlite::SqliteProvider;

#[cfg(feature = "postgres")]
use crate::database::postgres::PostgresProvider;

use crate::api::{
    browse_rows_handler, call_procedure_handler, describe_table_handler, export_rows_handler,
    health_handler, insert_form_handler, insert_row_handler, list_procedures_handler,
    list_tables_handler, list_views_handler, new_rows_handler, timeline_handler,
};

/// Main layer for mounting the explorer into an Axum application
///
/// # Example
///
/// ```rust,no_run
/// use axum::Router;
/// use schema_explorer::{ExplorerConfig, ExplorerLayer};
/// use sqlx::SqlitePool;
///
/// # async fn example() {
/// let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
/// let explorer = ExplorerLayer::sqlite("/explorer", pool, ExplorerConfig::default());
/// let app = Router::new().merge(explorer.into_router());
/// # }
/// ```
pub struct ExplorerLayer<DB: DatabaseProvider> {
    base_path: String,
    explorer: Explorer<DB>,
}

impl<DB: DatabaseProvider> ExplorerLayer<DB> {
    /// Create a new explorer at the given base path
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path where the explorer will be mounted (e.g., "/explorer")
    /// * `database` - The database provider implementation
    /// * `config` - Limits and relationship overrides
    pub fn new(base_path: impl Into<String>, database: DB, config: ExplorerConfig) -> Self {
        let base_path = base_path.into().trim_end_matches('/').to_string();
        Self {
            base_path,
            explorer: Explorer::new(Arc::new(database), config),
        }
    }

    pub fn explorer(&self) -> &Explorer<DB> {
        &self.explorer
    }

    /// Convert into an Axum Router that can be merged
    ///
    /// The returned router includes:
    /// - API endpoints at `{base_path}/api/*`
    /// - A liveness probe at `{base_path}/healthz`
    /// - Permissive CORS middleware
    pub fn into_router(self) -> Router {
        // Note: Axum 0.8 uses {param} syntax instead of :param
        let api_router = Router::new()
            .route("/tables", get(list_tables_handler::<DB>))
            .route("/views", get(list_views_handler::<DB>))
            .route("/procedures", get(list_procedures_handler::<DB>))
            .route("/procedures/{name}/call", axum::routing::post(call_procedure_handler::<DB>))
            .route("/tables/{name}", get(describe_table_handler::<DB>))
            .route(
                "/tables/{name}/rows",
                get(browse_rows_handler::<DB>).post(insert_row_handler::<DB>),
            )
            .route("/tables/{name}/form", get(insert_form_handler::<DB>))
            .route("/tables/{name}/new", get(new_rows_handler::<DB>))
            .route("/tables/{name}/export", get(export_rows_handler::<DB>))
            .route("/tables/{name}/timeline", get(timeline_handler::<DB>));

        Router::new()
            .route(&format!("{}/healthz", self.base_path), get(health_handler::<DB>))
            .nest(&format!("{}/api", self.base_path), api_router)
            .with_state(self.explorer)
            .layer(CorsLayer::permissive())
    }
}

#[cfg(feature = "sqlite")]
impl ExplorerLayer<SqliteProvider> {
    /// Create a new explorer for SQLite
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path where the explorer will be mounted
    /// * `pool` - The SQLite connection pool
    /// * `config` - Limits and relationship overrides
    pub fn sqlite(base_path: impl Into<String>, pool: sqlx::SqlitePool, config: ExplorerConfig) -> Self {
        Self::new(base_path, SqliteProvider::new(pool), config)
    }
}

#[cfg(feature = "postgres")]
impl ExplorerLayer<PostgresProvider> {
    /// Create a new explorer for PostgreSQL
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path where the explorer will be mounted
    /// * `pool` - The PostgreSQL connection pool
    /// * `config` - Limits and relationship overrides
    pub fn postgres(base_path: impl Into<String>, pool: sqlx::PgPool, config: ExplorerConfig) -> Self {
        Self::new(base_path, PostgresProvider::new(pool), config)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    async fn router() -> Router {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::raw_sql(
            r#"
            CREATE TABLE notes (note_id INTEGER PRIMARY KEY, title TEXT NOT NULL, written_on DATE);
            CREATE TABLE tags (label TEXT);
            INSERT INTO notes (title, written_on) VALUES ('first', '2024-01-02'), ('second', '2024-01-03');
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        ExplorerLayer::sqlite("/explorer/", pool, ExplorerConfig::default()).into_router()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_list_tables_and_health() {
        let (status, body) = send(router().await, get("/explorer/api/tables")).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["tables"], serde_json::json!(["main.notes", "main.tags"]));

        let (status, _) = send(router().await, get("/explorer/healthz")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (status, body) = send(router().await, get("/explorer/api/tables/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("error"));

        let (status, _) = send(
            router().await,
            get("/explorer/api/tables/tags/timeline"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for uri in [
            "/explorer/api/tables/notes/rows?dateFrom=not-a-date",
            "/explorer/api/tables/notes/export?dateTo=2024-99-01",
            "/explorer/api/tables/notes/timeline?day=yesterday",
        ] {
            let (status, body) = send(router().await, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body.contains("Invalid query"), "{}", body);
        }
    }

    #[tokio::test]
    async fn test_insert_statuses() {
        let request = |body: &str| {
            Request::builder()
                .method("POST")
                .uri("/explorer/api/tables/notes/rows")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let (status, body) = send(router().await, request(r#"{"title": "third", "written_on": ""}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.contains("\"status\":\"inserted\""));

        let (status, body) = send(router().await, request(r#"{"title": ""}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.contains("\"status\":\"rejected\""));
    }

    #[tokio::test]
    async fn test_export_is_csv_attachment() {
        let response = router()
            .await
            .oneshot(get("/explorer/api/tables/notes/export"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"main_notes.csv\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with("note_id,title,written_on\n"));
        assert_eq!(body.lines().count(), 3);
    }
}
