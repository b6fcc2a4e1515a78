use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Which storage backend holds file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Files on the local disk below `storage_dir`.
    Local,
    /// Remote object store reached over HTTPS.
    ObjectStore,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Where request bodies are staged for background uploads.
    pub temp_dir: PathBuf,
    pub backend: BackendKind,
    pub storage_enabled: bool,
    pub storage_dir: PathBuf,
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub request_timeout: Duration,
    pub max_concurrent_uploads: usize,
    pub task_ttl: Duration,
    pub max_upload_bytes: usize,
    /// Body limit for `POST /files`, which buffers the whole file.
    pub max_sync_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Cloud drive storage backend")]
pub struct Args {
    /// Host to bind to (overrides CLOUD_DRIVE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CLOUD_DRIVE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides CLOUD_DRIVE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Staging directory for async uploads (overrides CLOUD_DRIVE_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Storage backend (overrides CLOUD_DRIVE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory for the local backend (overrides CLOUD_DRIVE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Object store endpoint (overrides CLOUD_DRIVE_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Object store bucket (overrides CLOUD_DRIVE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Maximum background uploads in flight (overrides CLOUD_DRIVE_MAX_CONCURRENT_UPLOADS)
    #[arg(long)]
    pub max_concurrent_uploads: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up through `lookup`.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        let env_backend = match lookup("CLOUD_DRIVE_BACKEND") {
            Some(value) => BackendKind::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("parsing CLOUD_DRIVE_BACKEND value `{}`", value))?,
            None => BackendKind::Local,
        };

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| var("CLOUD_DRIVE_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => parse_var(&lookup, "CLOUD_DRIVE_PORT", 3000)?,
            },
            database_url: args
                .database_url
                .unwrap_or_else(|| var("CLOUD_DRIVE_DATABASE_URL", "sqlite://./data/meta/drive.db")),
            temp_dir: args
                .temp_dir
                .unwrap_or_else(|| var("CLOUD_DRIVE_TEMP_DIR", "./data/staging").into()),
            backend: args.backend.unwrap_or(env_backend),
            storage_enabled: parse_var(&lookup, "CLOUD_DRIVE_STORAGE_ENABLED", true)?,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| var("CLOUD_DRIVE_STORAGE_DIR", "./data/objects").into()),
            endpoint: args
                .endpoint
                .unwrap_or_else(|| var("CLOUD_DRIVE_ENDPOINT", "")),
            bucket: args
                .bucket
                .unwrap_or_else(|| var("CLOUD_DRIVE_BUCKET", "cloud-drive")),
            access_key_id: var("CLOUD_DRIVE_ACCESS_KEY_ID", ""),
            access_key_secret: var("CLOUD_DRIVE_ACCESS_KEY_SECRET", ""),
            request_timeout: Duration::from_secs(parse_var(
                &lookup,
                "CLOUD_DRIVE_REQUEST_TIMEOUT_SECS",
                300,
            )?),
            max_concurrent_uploads: match args.max_concurrent_uploads {
                Some(n) => n,
                None => parse_var(&lookup, "CLOUD_DRIVE_MAX_CONCURRENT_UPLOADS", 8)?,
            },
            task_ttl: Duration::from_secs(parse_var(&lookup, "CLOUD_DRIVE_TASK_TTL_SECS", 3600)?),
            max_upload_bytes: parse_var(
                &lookup,
                "CLOUD_DRIVE_MAX_UPLOAD_BYTES",
                1024 * 1024 * 1024,
            )?,
            max_sync_upload_bytes: parse_var(
                &lookup,
                "CLOUD_DRIVE_MAX_SYNC_UPLOAD_BYTES",
                64 * 1024 * 1024,
            )?,
        };

        if cfg.backend == BackendKind::ObjectStore && cfg.storage_enabled && cfg.endpoint.is_empty()
        {
            anyhow::bail!("CLOUD_DRIVE_ENDPOINT is required for the object-store backend");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(args: Args, vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = resolve(Args::default(), &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, BackendKind::Local);
        assert!(cfg.storage_enabled);
        assert_eq!(cfg.max_concurrent_uploads, 8);
        assert_eq!(cfg.task_ttl, Duration::from_secs(3600));
        assert!(cfg.max_sync_upload_bytes < cfg.max_upload_bytes);
    }

    #[test]
    fn args_override_env() {
        let args = Args::try_parse_from(["cloud-drive", "--port", "9000", "--backend", "object-store"])
            .unwrap();
        let cfg = resolve(
            args,
            &[
                ("CLOUD_DRIVE_PORT", "8000"),
                ("CLOUD_DRIVE_ENDPOINT", "oss.example.com"),
                ("CLOUD_DRIVE_STORAGE_ENABLED", "false"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.backend, BackendKind::ObjectStore);
        assert_eq!(cfg.endpoint, "oss.example.com");
        assert!(!cfg.storage_enabled);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = resolve(Args::default(), &[("CLOUD_DRIVE_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("CLOUD_DRIVE_PORT"));
    }

    #[test]
    fn object_store_needs_endpoint() {
        let err = resolve(Args::default(), &[("CLOUD_DRIVE_BACKEND", "object-store")]).unwrap_err();
        assert!(err.to_string().contains("ENDPOINT"));
    }
}
