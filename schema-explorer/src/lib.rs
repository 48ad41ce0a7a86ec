//! # schema-explorer
//!
//! Browse and edit an arbitrary relational schema without hand-written
//! per-table code, easily integrable as an Axum layer.
//!
//! ## Features
//!
//! - Live schema discovery (tables, views, procedures, keys) on every request
//! - Paginated browsing with free-text search and date-range filters
//! - Insert forms with option lists for referenced tables
//! - Inferred references for procedure parameters (`*_id` naming heuristics
//!   plus configurable overrides)
//! - Constraint violations mapped back onto form fields
//! - New-row polling, streamed CSV export and a per-day timeline
//! - Support for SQLite and PostgreSQL
//!
//! ## Security Warning
//!
//! **This is an internal tool!**
//!
//! - No authentication/authorization built-in
//! - Exposes full database schema and data, and can insert rows and call
//!   procedures
//! - Should never be exposed on public networks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use schema_explorer::{ExplorerConfig, ExplorerLayer};
//! use sqlx::SqlitePool;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = SqlitePool::connect("sqlite::memory:")
//!         .await
//!         .unwrap();
//!
//!     let app = Router::new()
//!         .route("/", get(|| async { "Hello, World!" }))
//!         .merge(ExplorerLayer::sqlite("/explorer", pool, ExplorerConfig::default()).into_router());
//!
//!     // Serve the application...
//! }
//! ```

// Public modules
pub mod api;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod constraint;
pub mod cursor;
pub mod database;
pub mod executor;
pub mod explorer;
pub mod export;
pub mod filter;
pub mod labels;
pub mod layer;
pub mod relationships;
pub mod schema;
pub mod timeline;

// Public exports
pub use config::{ExplorerConfig, OverrideError, RelationshipOverrides};
pub use explorer::Explorer;
pub use layer::ExplorerLayer;
pub use schema::{ColumnDescriptor, ForeignKeyEdge, ProcedureDescriptor, TableDescriptor, TableName};

// Re-export database providers
pub use database::traits::{DatabaseError, DatabaseProvider};

#[cfg(feature = "sqlite")]
pub use database::sqlite::SqliteProvider;

#[cfg(feature = "postgres")]
pub use database::postgres::PostgresProvider;
