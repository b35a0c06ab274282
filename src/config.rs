use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

const ENV_PREFIX: &str = "UPLOAD_SERVER_";

/// Which object store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// SQLite metadata plus payload files under `storage_dir`.
    Local,
    /// Process memory; everything is lost on exit.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true).map_err(|err| anyhow::anyhow!(err))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub cleanup_workers: usize,
    pub cleanup_queue_depth: usize,
    pub max_chunk_bytes: usize,
    pub merge_guard: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked upload server")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend (overrides UPLOAD_SERVER_STORE)
    #[arg(long, value_enum)]
    pub store: Option<StoreBackend>,

    /// Directory where object payloads are stored (overrides UPLOAD_SERVER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides UPLOAD_SERVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket holding chunks and merged files (overrides UPLOAD_SERVER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Background chunk-cleanup workers (overrides UPLOAD_SERVER_CLEANUP_WORKERS)
    #[arg(long)]
    pub cleanup_workers: Option<usize>,

    /// Pending cleanup jobs before new ones are dropped (overrides UPLOAD_SERVER_CLEANUP_QUEUE_DEPTH)
    #[arg(long)]
    pub cleanup_queue_depth: Option<usize>,

    /// Largest accepted chunk in bytes (overrides UPLOAD_SERVER_MAX_CHUNK_BYTES)
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// Disable per-hash serialization of merge requests (overrides UPLOAD_SERVER_MERGE_GUARD)
    #[arg(long)]
    pub no_merge_guard: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", name)),
        })?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup` (environment), over defaults.
    pub fn resolve(
        args: Args,
        lookup: impl Fn(&str) -> Result<Option<String>>,
    ) -> Result<Self> {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        let env_host = var("HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "PORT")?.unwrap_or(3000);
        let env_store = parse_var(&var, "STORE")?.unwrap_or(StoreBackend::Local);
        let env_storage = var("STORAGE_DIR")?.unwrap_or_else(|| "./data/objects".into());
        let env_db = var("DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/uploads.db".into());
        let env_bucket = var("BUCKET")?.unwrap_or_else(|| "uploads".into());
        let env_workers = parse_var(&var, "CLEANUP_WORKERS")?.unwrap_or(4);
        let env_depth = parse_var(&var, "CLEANUP_QUEUE_DEPTH")?.unwrap_or(1024);
        let env_max_chunk = parse_var(&var, "MAX_CHUNK_BYTES")?.unwrap_or(64 * 1024 * 1024);
        let env_merge_guard = parse_var(&var, "MERGE_GUARD")?.unwrap_or(true);

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            store: args.store.unwrap_or(env_store),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            cleanup_workers: args.cleanup_workers.unwrap_or(env_workers),
            cleanup_queue_depth: args.cleanup_queue_depth.unwrap_or(env_depth),
            max_chunk_bytes: args.max_chunk_bytes.unwrap_or(env_max_chunk),
            merge_guard: !args.no_merge_guard && env_merge_guard,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Result<Option<String>>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key)? {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parsing {}{} value `{}`: {}", ENV_PREFIX, key, value, err)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<AppConfig> {
        let args = Args::parse_from(std::iter::once("chunked-upload").chain(argv.iter().copied()));
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| Ok(vars.get(name).cloned()))
    }

    #[test]
    fn defaults_apply_without_env_or_flags() {
        let cfg = resolve(&[], &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.store, StoreBackend::Local);
        assert_eq!(cfg.bucket, "uploads");
        assert_eq!(cfg.max_chunk_bytes, 64 * 1024 * 1024);
        assert!(cfg.merge_guard);
    }

    #[test]
    fn flags_override_environment() {
        let cfg = resolve(
            &["--port", "9000", "--store", "memory", "--no-merge-guard"],
            &[
                ("UPLOAD_SERVER_PORT", "8000"),
                ("UPLOAD_SERVER_HOST", "127.0.0.1"),
                ("UPLOAD_SERVER_STORE", "local"),
                ("UPLOAD_SERVER_CLEANUP_WORKERS", "2"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.cleanup_workers, 2);
        assert!(!cfg.merge_guard);
    }

    #[test]
    fn environment_can_disable_merge_guard() {
        let cfg = resolve(&[], &[("UPLOAD_SERVER_MERGE_GUARD", "false")]).unwrap();
        assert!(!cfg.merge_guard);
    }

    #[test]
    fn bad_environment_values_are_reported() {
        let err = resolve(&[], &[("UPLOAD_SERVER_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("UPLOAD_SERVER_PORT"));

        let err = resolve(&[], &[("UPLOAD_SERVER_STORE", "s3")]).unwrap_err();
        assert!(err.to_string().contains("UPLOAD_SERVER_STORE"));
    }
}
