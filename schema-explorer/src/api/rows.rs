//! Row endpoints: browse, insert, new-row polling, export and timeline

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::collections::HashMap;

use crate::api::error_response;
use crate::database::traits::DatabaseProvider;
use crate::explorer::Explorer;
use crate::schema::{BrowseQuery, ChangesQuery, ExportQuery, InsertOutcome, TimelineQuery};

/// Handler for GET /api/tables/{name}/rows
///
/// Query parameters:
/// - page: One-based page number (default: 1)
/// - limit: Rows per page (clamped to the configured maximum)
/// - q: Case-insensitive substring over all text columns
/// - dateFrom / dateTo: Inclusive date range on the date column
/// - dateCol: Date column to filter on (default: first date/time column)
pub async fn browse_rows_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
    Query(query): Query<BrowseQuery>,
) -> Response {
    match explorer.browse(&table_name, &query).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to browse rows");
            error_response(&error)
        }
    }
}

/// Handler for GET /api/tables/{name}/form
///
/// Insertable columns, with option lists for columns that reference
/// another table.
pub async fn insert_form_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
) -> Response {
    match explorer.insert_form(&table_name).await {
        Ok(form) => (StatusCode::OK, Json(form)).into_response(),
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to build insert form");
            error_response(&error)
        }
    }
}

/// Handler for POST /api/tables/{name}/rows
///
/// Request body is a JSON object of raw form strings keyed by column.
/// Responds 201 with the bound values, or 422 with field errors and the
/// echoed input.
pub async fn insert_row_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
    Json(form): Json<HashMap<String, String>>,
) -> Response {
    match explorer.insert(&table_name, form).await {
        Ok(outcome @ InsertOutcome::Inserted { .. }) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Ok(outcome @ InsertOutcome::Rejected { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)).into_response()
        }
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to insert row");
            error_response(&error)
        }
    }
}

/// Handler for GET /api/tables/{name}/new
///
/// Query parameters:
/// - afterPk: Primary key watermark; rows with a greater key are returned
/// - maxRows: Maximum rows to return
pub async fn new_rows_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Response {
    match explorer
        .changes_since(&table_name, query.after_pk.as_deref(), query.max_rows)
        .await
    {
        Ok(changes) => (StatusCode::OK, Json(changes)).into_response(),
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to poll new rows");
            error_response(&error)
        }
    }
}

/// Handler for GET /api/tables/{name}/export
///
/// Streams the filtered table as `text/csv`. Rows are read from the store
/// while the body is sent.
pub async fn export_rows_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Response {
    match explorer.export(&table_name, &query).await {
        Ok(export) => {
            let disposition = format!("attachment; filename=\"{}\"", export.file_name());
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from_stream(export.chunks),
            )
                .into_response()
        }
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to export rows");
            error_response(&error)
        }
    }
}

/// Handler for GET /api/tables/{name}/timeline
pub async fn timeline_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(table_name): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Response {
    match explorer.timeline(&table_name, &query).await {
        Ok(timeline) => (StatusCode::OK, Json(timeline)).into_response(),
        Err(error) => {
            tracing::error!(table = %table_name, %error, "Failed to build timeline");
            error_response(&error)
        }
    }
}
