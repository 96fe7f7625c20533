use anyhow::Result;
use axum::{Router, extract::DefaultBodyLimit};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod store;

use config::StorageBackend;
use services::{
    AppState,
    derived::DerivedCache,
    metadata::FileMetadataStore,
    range::RangeServer,
    transform::{CommandTransformer, ImageTransformer},
    upload::UploadService,
};
use store::{BlobStore, fs::FsBlobStore, memory::MemBlobStore};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-store with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the database file itself; touch it first
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("Database file can be created/opened."),
        Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Select blob backend at startup ---
    let blobs: Arc<dyn BlobStore> = match cfg.backend {
        StorageBackend::Fs => Arc::new(FsBlobStore::new(&cfg.storage_dir)?),
        StorageBackend::Memory => {
            tracing::warn!("memory backend selected; stored objects will not survive restarts");
            Arc::new(MemBlobStore::new())
        }
    };

    // --- External transform (optional) ---
    let transformer: Option<Arc<dyn ImageTransformer>> = cfg
        .transform_command
        .as_deref()
        .and_then(CommandTransformer::from_command_line)
        .map(|t| Arc::new(t) as Arc<dyn ImageTransformer>);
    if transformer.is_none() {
        tracing::info!("no transform command configured; derived variants disabled");
    }

    // --- Initialize core services ---
    let meta = FileMetadataStore::new(db.clone());
    let state = AppState {
        blobs: blobs.clone(),
        meta: meta.clone(),
        uploads: UploadService::new(blobs.clone(), meta.clone(), cfg.max_single_upload_bytes),
        derived: DerivedCache::new(blobs.clone(), transformer, cfg.derive_ceiling_bytes),
        ranges: RangeServer::new(blobs, cfg.max_slice_bytes),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_single_upload_bytes as usize))
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations manually from the migration SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
