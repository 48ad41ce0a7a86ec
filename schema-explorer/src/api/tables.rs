//! Table listing and schema endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::api::error_response;
use crate::database::traits::DatabaseProvider;
use crate::explorer::Explorer;
use crate::schema::{TablesResponse, ViewsResponse};

/// Handler for GET /api/tables
///
/// Returns every user table as `schema.table`, sorted.
pub async fn list_tables_handler<DB: DatabaseProvider>(State(explorer): State<Explorer<DB>>) -> Response {
    match explorer.tables().await {
        Ok(tables) => (StatusCode::OK, Json(TablesResponse { tables })).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to list tables");
            error_response(&error)
        }
    }
}

/// Handler for GET /api/views
pub async fn list_views_handler<DB: DatabaseProvider>(State(explorer): State<Explorer<DB>>) -> Response {
    match explorer.views().await {
        Ok(views) => (StatusCode::OK, Json(ViewsResponse { views })).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to list views");
            error_response(&error)
        }
    }
}

/// Handler for GET /api/tables/{name}
///
/// Returns the table descriptor: columns with semantic types, primary key
/// and declared foreign keys. `name` is `table` or `schema.table`.
pub async fn describe_table_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
) -> Response {
    match explorer.describe(&table_name).await {
        Ok(descriptor) => (StatusCode::OK, Json(descriptor)).into_response(),
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to describe table");
            error_response(&error)
        }
    }
}

/// Handler for GET /healthz
pub async fn health_handler<DB: DatabaseProvider>(State(explorer): State<Explorer<DB>>) -> Response {
    match explorer.health().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response(),
        Err(error) => {
            tracing::error!(%error, "Health check failed");
            error_response(&error)
        }
    }
}
