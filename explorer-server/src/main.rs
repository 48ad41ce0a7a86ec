use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use schema_explorer::{
    DatabaseProvider, ExplorerConfig, ExplorerLayer, PostgresProvider, RelationshipOverrides, SqliteProvider,
};
use sqlx::{postgres::PgPool, sqlite::SqlitePool};
use std::path::PathBuf;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod database;

const DEFAULT_LOG_FILTER: &str = "schema_explorer=info,explorer_server=info,tower_http=info";

/// Serve the schema explorer for one database
#[derive(Parser, Debug)]
#[command(name = "explorer-server", version)]
struct Args {
    /// `sqlite:` or `postgres://` connection URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./data/explorer.db?mode=rwc")]
    database_url: String,

    #[arg(long, env = "EXPLORER_BIND", default_value = "127.0.0.1:3000")]
    bind: String,

    /// URL path the explorer is mounted under
    #[arg(long, default_value = "/explorer")]
    base_path: String,

    /// JSON file with relationship overrides, merged over the built-in ones
    #[arg(long, env = "EXPLORER_OVERRIDES")]
    overrides: Option<PathBuf>,

    /// Tracing filter directives
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Create and fill the demo schema (SQLite only)
    #[arg(long)]
    seed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            args.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut overrides = RelationshipOverrides::builtin();
    if let Some(path) = &args.overrides {
        let loaded = RelationshipOverrides::load(path)
            .with_context(|| format!("Failed to load overrides from {}", path.display()))?;
        tracing::info!(path = %path.display(), count = loaded.len(), "Loaded relationship overrides");
        overrides.merge(loaded);
    }
    let config = ExplorerConfig::default().with_overrides(overrides);

    if args.database_url.starts_with("postgres://") || args.database_url.starts_with("postgresql://") {
        if args.seed {
            tracing::warn!("--seed only applies to SQLite, ignoring");
        }
        let pool = PgPool::connect(&args.database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;
        serve(&args, ExplorerLayer::new(&args.base_path, PostgresProvider::new(pool), config)).await
    } else if args.database_url.starts_with("sqlite:") {
        let pool = SqlitePool::connect(&args.database_url)
            .await
            .context("Failed to connect to SQLite database")?;
        if args.seed {
            database::setup(&pool).await.context("Failed to set up demo schema")?;
        }
        serve(&args, ExplorerLayer::new(&args.base_path, SqliteProvider::new(pool), config)).await
    } else {
        anyhow::bail!("Unsupported database URL, expected sqlite: or postgres://")
    }
}

async fn serve<DB: DatabaseProvider>(args: &Args, explorer: ExplorerLayer<DB>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(root_handler))
        .merge(explorer.into_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;

    tracing::info!(
        "Explorer available at http://{}{}/api/tables",
        args.bind,
        args.base_path.trim_end_matches('/')
    );

    axum::serve(listener, app).await.context("Server error")
}

async fn root_handler() -> &'static str {
    "Welcome to schema-explorer server"
}
