//! Configuration: tuning knobs from an optional TOML file, storage
//! credentials from the environment.
//!
//! Everything is validated up front by [`load_config`] and
//! [`StoreCredentials::from_env`] so a bad setup fails before any source
//! file is opened or any connection is made.
//!
//! ```toml
//! [ingest]
//! chunk_size = 500
//! progress_every = 1000
//! include_globs = ["**/*.csv", "**/*.jsonl"]
//! delimiter = ","
//! max_reported_errors = 10
//! default_source = "./data/bookings"
//!
//! [loader]
//! concurrency = 1
//! timeout_secs = 30
//! max_retries = 3
//! backoff_ms = 500
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::IngestError;

pub const DEFAULT_CONFIG_PATH: &str = "./config/bookings.toml";

/// Largest accepted `ingest.chunk_size`.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// Largest accepted `loader.max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Largest accepted `loader.backoff_ms`.
pub const MAX_BACKOFF_MS: u64 = 60_000;

pub const ENV_DATABASE_URL: &str = "BOOKINGS_DATABASE_URL";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_PROJECT_REF: &str = "SUPABASE_PROJECT_REF";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
    #[serde(default)]
    pub default_source: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_every: default_progress_every(),
            include_globs: default_include_globs(),
            delimiter: default_delimiter(),
            max_reported_errors: default_max_reported_errors(),
            default_source: None,
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_progress_every() -> u64 {
    1000
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.csv".to_string(),
        "**/*.txt".to_string(),
        "**/*.jsonl".to_string(),
        "**/*.ndjson".to_string(),
    ]
}
fn default_delimiter() -> char {
    ','
}
fn default_max_reported_errors() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// Chunks in flight per phase.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}

/// Load configuration.
///
/// With an explicit `path` the file must exist. Without one,
/// [`DEFAULT_CONFIG_PATH`] is used when present and built-in defaults
/// otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(p) => parse_file(p)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                parse_file(default)?
            } else {
                Config::default()
            }
        }
    };
    validate(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| {
            IngestError::FatalConfiguration(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

pub fn validate(config: &Config) -> std::result::Result<(), IngestError> {
    let fatal = |msg: &str| Err(IngestError::FatalConfiguration(msg.to_string()));

    if config.ingest.chunk_size == 0 || config.ingest.chunk_size > MAX_CHUNK_SIZE {
        return fatal("ingest.chunk_size must be between 1 and 1000");
    }
    if config.ingest.progress_every == 0 {
        return fatal("ingest.progress_every must be > 0");
    }
    if config.ingest.include_globs.is_empty() {
        return fatal("ingest.include_globs must not be empty");
    }
    if config.ingest.delimiter == '"' || config.ingest.delimiter == '\n' {
        return fatal("ingest.delimiter cannot be a quote or newline");
    }
    if config.loader.concurrency == 0 {
        return fatal("loader.concurrency must be >= 1");
    }
    if config.loader.timeout_secs == 0 {
        return fatal("loader.timeout_secs must be > 0");
    }
    if config.loader.max_retries > MAX_RETRIES {
        return fatal("loader.max_retries must be <= 10");
    }
    if config.loader.backoff_ms > MAX_BACKOFF_MS {
        return fatal("loader.backoff_ms must be <= 60000");
    }
    Ok(())
}

/// Where and how to reach the store. Secrets never come from the TOML file.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreCredentials {
    /// Local SQLite database, e.g. `sqlite:./data/bookings.sqlite`.
    Sqlite { url: String },
    /// Hosted Postgres behind a PostgREST gateway.
    Postgrest { base_url: String, service_key: String },
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreCredentials::Sqlite { url } => f.debug_struct("Sqlite").field("url", url).finish(),
            StoreCredentials::Postgrest { base_url, .. } => f
                .debug_struct("Postgrest")
                .field("base_url", base_url)
                .field("service_key", &"<redacted>")
                .finish(),
        }
    }
}

impl StoreCredentials {
    /// Short backend name for logs and summaries.
    pub fn backend(&self) -> &'static str {
        match self {
            StoreCredentials::Sqlite { .. } => "sqlite",
            StoreCredentials::Postgrest { .. } => "postgrest",
        }
    }

    pub fn from_env() -> std::result::Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve credentials from any key → value lookup.
    ///
    /// `BOOKINGS_DATABASE_URL` wins when set; otherwise a Supabase URL (or
    /// project ref) plus service-role key is required.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_DATABASE_URL) {
            if !url.starts_with("sqlite:") {
                return Err(IngestError::FatalConfiguration(format!(
                    "{} must be a sqlite: URL, got '{}'",
                    ENV_DATABASE_URL, url
                )));
            }
            return Ok(StoreCredentials::Sqlite { url });
        }

        let base_url = get(ENV_SUPABASE_URL).or_else(|| {
            get(ENV_SUPABASE_PROJECT_REF).map(|r| format!("https://{}.supabase.co", r))
        });
        match (base_url, get(ENV_SUPABASE_KEY)) {
            (Some(base_url), Some(service_key)) => Ok(StoreCredentials::Postgrest {
                base_url: base_url.trim_end_matches('/').to_string(),
                service_key,
            }),
            (Some(_), None) => Err(IngestError::FatalConfiguration(format!(
                "{} is not set",
                ENV_SUPABASE_KEY
            ))),
            (None, _) => Err(IngestError::FatalConfiguration(format!(
                "no storage credentials: set {} or {} and {}",
                ENV_DATABASE_URL, ENV_SUPABASE_URL, ENV_SUPABASE_KEY
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_parse_from_empty_file() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.ingest.chunk_size, 500);
        assert_eq!(cfg.ingest.delimiter, ',');
        assert_eq!(cfg.loader.concurrency, 1);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let cfg: Config =
            toml::from_str("[ingest]\nchunk_size = 750\ndelimiter = \";\"\n[loader]\nmax_retries = 0\n")
                .unwrap();
        assert_eq!(cfg.ingest.chunk_size, 750);
        assert_eq!(cfg.ingest.delimiter, ';');
        assert_eq!(cfg.ingest.progress_every, 1000);
        assert_eq!(cfg.loader.max_retries, 0);
        assert_eq!(cfg.loader.timeout_secs, 30);
    }

    #[test]
    fn test_chunk_size_bounds() {
        let mut cfg = Config::default();
        cfg.ingest.chunk_size = 0;
        assert!(validate(&cfg).is_err());
        cfg.ingest.chunk_size = 1001;
        assert!(validate(&cfg).is_err());
        cfg.ingest.chunk_size = 1000;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_retry_settings_are_bounded() {
        let mut cfg = Config::default();
        cfg.loader.backoff_ms = u64::MAX;
        assert!(validate(&cfg).is_err());
        cfg.loader.backoff_ms = MAX_BACKOFF_MS;
        assert!(validate(&cfg).is_ok());
        cfg.loader.max_retries = MAX_RETRIES + 1;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_explicit_missing_config_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_config(Some(&tmp.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_credentials_sqlite() {
        let creds =
            StoreCredentials::from_lookup(lookup(&[(ENV_DATABASE_URL, "sqlite:./x.db")])).unwrap();
        assert_eq!(
            creds,
            StoreCredentials::Sqlite {
                url: "sqlite:./x.db".to_string()
            }
        );
    }

    #[test]
    fn test_credentials_postgrest_from_project_ref() {
        let creds = StoreCredentials::from_lookup(lookup(&[
            (ENV_SUPABASE_PROJECT_REF, "abcd"),
            (ENV_SUPABASE_KEY, "secret"),
        ]))
        .unwrap();
        match &creds {
            StoreCredentials::Postgrest { base_url, .. } => {
                assert_eq!(base_url, "https://abcd.supabase.co")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_credentials_missing() {
        assert!(matches!(
            StoreCredentials::from_lookup(lookup(&[])),
            Err(IngestError::FatalConfiguration(_))
        ));
        assert!(StoreCredentials::from_lookup(lookup(&[(ENV_SUPABASE_URL, "https://x")])).is_err());
        assert!(
            StoreCredentials::from_lookup(lookup(&[(ENV_DATABASE_URL, "postgres://x")])).is_err()
        );
    }
}
