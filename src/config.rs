use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;

const DEFAULT_MAX_SINGLE_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_DERIVE_CEILING_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_SLICE_BYTES: u64 = 50 * 1024 * 1024;

/// Which blob backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Durable on-disk store beneath `storage_dir`.
    Fs,
    /// Ephemeral in-memory store.
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "fs" => Ok(StorageBackend::Fs),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("unknown storage backend `{}` (expected `fs` or `memory`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub backend: StorageBackend,
    /// Ceiling for single-shot uploads and for individual multipart parts.
    pub max_single_upload_bytes: u64,
    /// Images above this size always serve the original, uncompressed.
    pub derive_ceiling_bytes: u64,
    /// Largest object the fallback range path may buffer for slicing.
    pub max_slice_bytes: u64,
    /// External transform command; empty disables derived variants.
    pub transform_command: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressed media store API")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides MEDIA_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend: `fs` or `memory` (overrides MEDIA_STORE_BACKEND)
    #[arg(long)]
    pub backend: Option<String>,

    /// Single-shot upload ceiling in bytes (overrides MEDIA_STORE_MAX_SINGLE_UPLOAD_BYTES)
    #[arg(long)]
    pub max_single_upload_bytes: Option<u64>,

    /// Transform command line (overrides MEDIA_STORE_TRANSFORM_COMMAND)
    #[arg(long)]
    pub transform_command: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MEDIA_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("MEDIA_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MEDIA_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading MEDIA_STORE_PORT"),
        };
        let env_storage =
            env::var("MEDIA_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("MEDIA_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/media_store.db".into());
        let env_backend = env::var("MEDIA_STORE_BACKEND").unwrap_or_else(|_| "fs".into());
        let env_max_single = match env::var("MEDIA_STORE_MAX_SINGLE_UPLOAD_BYTES") {
            Ok(value) => Some(value.parse::<u64>().with_context(|| {
                format!("parsing MEDIA_STORE_MAX_SINGLE_UPLOAD_BYTES value `{}`", value)
            })?),
            Err(_) => None,
        };
        let env_transform = env::var("MEDIA_STORE_TRANSFORM_COMMAND").ok();

        // --- Merge ---
        let backend = StorageBackend::parse(&args.backend.unwrap_or(env_backend))?;
        let transform_command = args
            .transform_command
            .or(env_transform)
            .filter(|cmd| !cmd.trim().is_empty());

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            backend,
            max_single_upload_bytes: args
                .max_single_upload_bytes
                .or(env_max_single)
                .unwrap_or(DEFAULT_MAX_SINGLE_UPLOAD_BYTES),
            derive_ceiling_bytes: DEFAULT_DERIVE_CEILING_BYTES,
            max_slice_bytes: DEFAULT_MAX_SLICE_BYTES,
            transform_command,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
