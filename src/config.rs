use crate::services::photo_service::IngestSettings;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr};

/// Where blob payloads live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BlobBackend {
    /// Sharded directory tree under `storage_dir`.
    Fs,
    /// Process memory; contents vanish on restart.
    Memory,
}

impl FromStr for BlobBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fs" | "filesystem" => Ok(Self::Fs),
            "memory" | "mem" => Ok(Self::Memory),
            other => bail!("unknown blob backend `{}`", other),
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
    pub blob_backend: BlobBackend,
    pub max_width: u32,
    pub max_height: u32,
    pub public_host: String,
    pub public_scheme: String,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Content-addressed photo store")]
pub struct Args {
    /// Host to bind to (overrides PHOTO_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides PHOTO_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides PHOTO_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend (overrides PHOTO_STORE_BLOB_BACKEND)
    #[arg(long, value_enum)]
    pub blob_backend: Option<BlobBackend>,

    /// Uploads wider than this are shrunk (overrides PHOTO_STORE_MAX_WIDTH)
    #[arg(long)]
    pub max_width: Option<u32>,

    /// Uploads taller than this are shrunk (overrides PHOTO_STORE_MAX_HEIGHT)
    #[arg(long)]
    pub max_height: Option<u32>,

    /// Host used in photo URLs (overrides PHOTO_STORE_PUBLIC_HOST)
    #[arg(long)]
    pub public_host: Option<String>,

    /// Scheme used in photo URLs (overrides PHOTO_STORE_PUBLIC_SCHEME)
    #[arg(long)]
    pub public_scheme: Option<String>,

    /// JPEG quality for stored blobs, 0-100 (overrides PHOTO_STORE_JPEG_QUALITY)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Largest accepted upload body in bytes (overrides PHOTO_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// A CLI value wins outright; the environment is only consulted without one.
fn cli_or_env<T>(cli: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match cli {
        Some(value) => Ok(value),
        None => env_or(name, default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        let cfg = Self {
            host: cli_or_env(args.host, "PHOTO_STORE_HOST", "0.0.0.0".into())?,
            port: cli_or_env(args.port, "PHOTO_STORE_PORT", 3000)?,
            storage_dir: cli_or_env(
                args.storage_dir,
                "PHOTO_STORE_STORAGE_DIR",
                "./data/photos".into(),
            )?,
            database_url: cli_or_env(
                args.database_url,
                "PHOTO_STORE_DATABASE_URL",
                "sqlite://./data/meta/photo_store.db".into(),
            )?,
            blob_backend: cli_or_env(
                args.blob_backend,
                "PHOTO_STORE_BLOB_BACKEND",
                BlobBackend::Fs,
            )?,
            max_width: cli_or_env(args.max_width, "PHOTO_STORE_MAX_WIDTH", 2048)?,
            max_height: cli_or_env(args.max_height, "PHOTO_STORE_MAX_HEIGHT", 2048)?,
            public_host: cli_or_env(
                args.public_host,
                "PHOTO_STORE_PUBLIC_HOST",
                "localhost:3000".into(),
            )?,
            public_scheme: cli_or_env(
                args.public_scheme,
                "PHOTO_STORE_PUBLIC_SCHEME",
                "http".into(),
            )?,
            jpeg_quality: cli_or_env(args.jpeg_quality, "PHOTO_STORE_JPEG_QUALITY", 100)?
                .min(100),
            max_upload_bytes: cli_or_env(
                args.max_upload_bytes,
                "PHOTO_STORE_MAX_UPLOAD_BYTES",
                32 * 1024 * 1024,
            )?,
        };

        if cfg.max_width == 0 || cfg.max_height == 0 {
            bail!(
                "max width and height must be positive, got {}x{}",
                cfg.max_width,
                cfg.max_height
            );
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            max_width: self.max_width,
            max_height: self.max_height,
            public_scheme: self.public_scheme.clone(),
            public_host: self.public_host.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }
}
