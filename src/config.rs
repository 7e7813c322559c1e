use crate::{auth::Credentials, services::policy::UploadPolicy};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

const MIB: u64 = 1024 * 1024;

/// Where uploaded objects end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Google Cloud Storage, credentials from the environment.
    Gcs,
    /// A directory on local disk.
    Local,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| anyhow::anyhow!("unknown storage backend `{s}` (expected gcs or local)"))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout: Duration,
    pub backend: StorageBackend,
    pub bucket: String,
    pub gcs_project: Option<String>,
    pub gcs_location: String,
    pub storage_dir: String,
    pub auth_username: String,
    auth_password: String,
    pub upload_limit_mib: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Authenticated single-file upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for in-flight requests on shutdown (overrides SHUTDOWN_TIMEOUT)
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Storage backend (overrides STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StorageBackend>,

    /// Destination bucket (overrides GCS_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Directory used by the local backend (overrides STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Maximum upload size in MiB (overrides FILE_UPLOAD_LIMIT)
    #[arg(long)]
    pub upload_limit: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge `args` over values found through `lookup`, over defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let env_port = parse_env(&lookup, "PORT", 8080u16)?;
        let env_timeout = parse_env(&lookup, "SHUTDOWN_TIMEOUT", 5u64)?;
        let env_backend = parse_env(&lookup, "STORAGE_BACKEND", StorageBackend::Gcs)?;
        let env_limit = parse_env(&lookup, "FILE_UPLOAD_LIMIT", 10u64)?;

        let cfg = Self {
            host: args.host.unwrap_or_else(|| env_or("UPLOAD_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout.unwrap_or(env_timeout)),
            backend: args.backend.unwrap_or(env_backend),
            bucket: args
                .bucket
                .or_else(|| lookup("GCS_BUCKET_NAME"))
                .unwrap_or_default(),
            gcs_project: lookup("GCS_PROJECT").filter(|p| !p.is_empty()),
            gcs_location: env_or("GCS_LOCATION", "global"),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("STORAGE_DIR", "./data/objects")),
            auth_username: lookup("AUTH_USERNAME").unwrap_or_default(),
            auth_password: lookup("AUTH_PASSWORD").unwrap_or_default(),
            upload_limit_mib: args.upload_limit.unwrap_or(env_limit),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            bail!("GCS_BUCKET_NAME must be set");
        }
        if self.auth_username.is_empty() || self.auth_password.is_empty() {
            bail!("AUTH_USERNAME and AUTH_PASSWORD must both be set");
        }
        if self.upload_limit_mib == 0 {
            bail!("FILE_UPLOAD_LIMIT must be at least 1 MiB");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.upload_limit_mib.saturating_mul(MIB)
    }

    /// Immutable upload policy: the default allow-list with the configured limit.
    pub fn policy(&self) -> UploadPolicy {
        UploadPolicy::with_max_bytes(self.max_upload_bytes())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.auth_username, &self.auth_password)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("gcs_project", &self.gcs_project)
            .field("gcs_location", &self.gcs_location)
            .field("storage_dir", &self.storage_dir)
            .field("auth_username", &self.auth_username)
            .field("auth_password", &"<redacted>")
            .field("upload_limit_mib", &self.upload_limit_mib)
            .finish()
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {key} value `{value}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("GCS_BUCKET_NAME", "uploads"),
        ("AUTH_USERNAME", "admin"),
        ("AUTH_PASSWORD", "s3cret"),
    ];

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let cfg = AppConfig::from_sources(Args::default(), env(&REQUIRED)).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.backend, StorageBackend::Gcs);
        assert_eq!(cfg.gcs_location, "global");
        assert_eq!(cfg.gcs_project, None);
        assert_eq!(cfg.policy().max_bytes(), 10 * MIB);
        assert!(cfg.credentials().verify("admin", "s3cret"));
    }

    #[test]
    fn args_override_env() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("PORT", "9000"), ("STORAGE_BACKEND", "gcs"), ("FILE_UPLOAD_LIMIT", "4")]);
        let args = Args {
            port: Some(7000),
            backend: Some(StorageBackend::Local),
            ..Args::default()
        };

        let cfg = AppConfig::from_sources(args, env(&pairs)).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.backend, StorageBackend::Local);
        assert_eq!(cfg.max_upload_bytes(), 4 * MIB);
    }

    #[test]
    fn backend_name_is_case_insensitive() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STORAGE_BACKEND", "LOCAL"));
        let cfg = AppConfig::from_sources(Args::default(), env(&pairs)).unwrap();
        assert_eq!(cfg.backend, StorageBackend::Local);
    }

    #[test]
    fn invalid_numbers_name_the_key() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));
        let err = AppConfig::from_sources(Args::default(), env(&pairs)).unwrap_err();
        assert!(format!("{err:#}").contains("PORT"));
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = AppConfig::from_sources(
            Args::default(),
            env(&[("GCS_BUCKET_NAME", "uploads"), ("AUTH_USERNAME", "admin")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("AUTH_PASSWORD"));
    }

    #[test]
    fn missing_bucket_is_fatal() {
        let err = AppConfig::from_sources(
            Args::default(),
            env(&[("AUTH_USERNAME", "admin"), ("AUTH_PASSWORD", "x")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("GCS_BUCKET_NAME"));
    }

    #[test]
    fn debug_output_redacts_password() {
        let cfg = AppConfig::from_sources(Args::default(), env(&REQUIRED)).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
