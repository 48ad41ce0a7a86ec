//! REST API endpoints
//!
//! This module contains all API endpoint handlers for the explorer. Every
//! handler takes the [`Explorer`](crate::Explorer) as state and answers
//! failures with `{ "error": ... }` and a status derived from the error kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::database::traits::DatabaseError;

pub mod procedures;
pub mod rows;
pub mod tables;

// Re-export handlers for convenience
pub use procedures::{call_procedure_handler, list_procedures_handler};
pub use rows::{
    browse_rows_handler, export_rows_handler, insert_form_handler, insert_row_handler,
    new_rows_handler, timeline_handler,
};
pub use tables::{describe_table_handler, health_handler, list_tables_handler, list_views_handler};

/// HTTP status for a failed operation
pub fn error_status(error: &DatabaseError) -> StatusCode {
    match error {
        DatabaseError::TableNotFound(_) | DatabaseError::UnknownProcedure(_) => StatusCode::NOT_FOUND,
        DatabaseError::Query(_) | DatabaseError::InvalidColumn(_) => StatusCode::BAD_REQUEST,
        DatabaseError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: &DatabaseError) -> Response {
    (
        error_status(error),
        Json(serde_json::json!({
            "error": error.to_string()
        })),
    )
        .into_response()
}
