//! Stored procedure endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::collections::HashMap;

use crate::api::error_response;
use crate::database::traits::DatabaseProvider;
use crate::explorer::Explorer;
use crate::schema::{CallOutcome, ProceduresResponse};

/// Handler for GET /api/procedures
///
/// Procedures of the default schema. Each parameter carries the table it
/// refers to, when one could be inferred, with a bounded option list.
pub async fn list_procedures_handler<DB: DatabaseProvider>(State(explorer): State<Explorer<DB>>) -> Response {
    match explorer.procedures().await {
        Ok(procedures) => (StatusCode::OK, Json(ProceduresResponse { procedures })).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to list procedures");
            error_response(&error)
        }
    }
}

/// Handler for POST /api/procedures/{name}/call
///
/// Request body is a JSON object of raw argument strings keyed by
/// parameter name. Only procedures from the live list can be called.
pub async fn call_procedure_handler<DB: DatabaseProvider>(
    State(explorer): State<Explorer<DB>>,
    Path(procedure_name): Path<String>,
    Json(arguments): Json<HashMap<String, String>>,
) -> Response {
    match explorer.call_procedure(&procedure_name, arguments).await {
        Ok(outcome @ CallOutcome::Called { .. }) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(outcome @ CallOutcome::Rejected { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)).into_response()
        }
        Err(error) => {
            tracing::error!(procedure = %procedure_name, %error, "Failed to call procedure");
            error_response(&error)
        }
    }
}
