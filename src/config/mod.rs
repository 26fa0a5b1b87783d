//! Configuration loading for the tenancy service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `TENANCY_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// How tenants are laid out on an embedded (file-based) backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedIsolation {
    /// Every tenant shares the control-plane database handle.
    Shared,
    /// Every tenant gets its own database file under `db_path`.
    PerFile,
}

impl std::str::FromStr for EmbeddedIsolation {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "per_file" | "per-file" | "isolated" => Ok(Self::PerFile),
            other => Err(ConfigError::InvalidEmbeddedIsolation {
                value: other.to_string(),
            }),
        }
    }
}

/// What the directory does with a tenant whose provisioning failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    /// Hand out the degraded handle; requests fail later if tables are missing.
    Serve,
    /// Refuse to hand out handles for degraded tenants.
    Reject,
}

impl std::str::FromStr for DegradedPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serve" => Ok(Self::Serve),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::InvalidDegradedPolicy {
                value: other.to_string(),
            }),
        }
    }
}

/// Application configuration derived from `TENANCY_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Control-plane connection string. Tenant databases live on the same host
    /// (server backends) or next to it (embedded backends).
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Directory holding embedded database files (`app.db`, `company_{id}.db`).
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Root of the seed manifests (`categories/` and `payroll/` below it).
    #[serde(default = "default_seed_dir")]
    pub seed_dir: PathBuf,
    /// When set, only this payroll spec is seeded instead of scanning `payroll/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_payroll_spec: Option<PathBuf>,
    #[serde(default = "default_embedded_isolation")]
    pub embedded_isolation: EmbeddedIsolation,
    #[serde(default = "default_degraded_policy")]
    pub degraded_policy: DegradedPolicy,
    /// Fixed tenant id used when multi-tenancy is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_tenant_id: Option<i32>,
    #[serde(default = "default_tenant_path_pattern")]
    pub tenant_path_pattern: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            db_path: default_db_path(),
            seed_dir: default_seed_dir(),
            default_payroll_spec: None,
            embedded_isolation: default_embedded_isolation(),
            degraded_policy: default_degraded_policy(),
            single_tenant_id: None,
            tenant_path_pattern: default_tenant_path_pattern(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (URL passwords are masked).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_url(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Directory holding category manifests.
    pub fn category_seed_dir(&self) -> PathBuf {
        self.seed_dir.join("categories")
    }

    /// Directory holding payroll spec documents.
    pub fn payroll_seed_dir(&self) -> PathBuf {
        self.seed_dir.join("payroll")
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if !(self.database_url.starts_with("sqlite:")
            || self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(ConfigError::UnsupportedDatabaseUrl {
                value: redact_url(&self.database_url),
            });
        }

        if self.db_max_connections == 0 || self.db_max_connections > 1000 {
            return Err(ConfigError::InvalidMaxConnections {
                value: self.db_max_connections,
            });
        }

        if self.db_acquire_timeout_ms < 100 {
            return Err(ConfigError::InvalidAcquireTimeout {
                value: self.db_acquire_timeout_ms,
            });
        }

        if let Some(id) = self.single_tenant_id
            && id <= 0
        {
            return Err(ConfigError::InvalidSingleTenantId { value: id });
        }

        if let Err(source) = regex::Regex::new(&self.tenant_path_pattern) {
            return Err(ConfigError::InvalidTenantPathPattern {
                value: self.tenant_path_pattern.clone(),
                source,
            });
        }

        Ok(())
    }
}

const REDACTED: &str = "REDACTED";

/// Replaces the password in a connection URL. The marker avoids characters
/// `Url` would percent-encode.
fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => match url.set_password(Some(REDACTED)) {
            Ok(()) => url.to_string(),
            // Never echo a URL whose password could not be replaced.
            Err(()) => REDACTED.to_string(),
        },
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://.local/app.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".local")
}

fn default_seed_dir() -> PathBuf {
    PathBuf::from("seed")
}

fn default_embedded_isolation() -> EmbeddedIsolation {
    EmbeddedIsolation::Shared
}

fn default_degraded_policy() -> DegradedPolicy {
    DegradedPolicy::Serve
}

fn default_tenant_path_pattern() -> String {
    r"/compan(?:y|ies)/(?P<tenant>\d+)".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("database url is missing; set TENANCY_DATABASE_URL or TENANCY_DB_TYPE")]
    MissingDatabaseUrl,
    #[error("unsupported database url '{value}'; expected sqlite: or postgres://")]
    UnsupportedDatabaseUrl { value: String },
    #[error("invalid database url '{value}': {source}")]
    InvalidDatabaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("database max connections must be between 1 and 1000, got {value}")]
    InvalidMaxConnections { value: u32 },
    #[error("database acquire timeout must be at least 100ms, got {value}")]
    InvalidAcquireTimeout { value: u64 },
    #[error("embedded isolation must be 'shared' or 'per_file', got '{value}'")]
    InvalidEmbeddedIsolation { value: String },
    #[error("degraded policy must be 'serve' or 'reject', got '{value}'")]
    InvalidDegradedPolicy { value: String },
    #[error("single tenant id must be positive, got {value}")]
    InvalidSingleTenantId { value: i32 },
    #[error("tenant path pattern '{value}' is not a valid regex: {source}")]
    InvalidTenantPathPattern { value: String, source: regex::Error },
}

/// Loads configuration using layered `.env` files and `TENANCY_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration, then validates it.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("TENANCY_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);

        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);

        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);

        let db_path = layered
            .remove("DB_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let database_url = match layered.remove("DATABASE_URL").filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => compose_database_url(&mut layered, &db_path)?,
        };

        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);

        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let seed_dir = layered
            .remove("SEED_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_seed_dir);

        let default_payroll_spec = layered
            .remove("DEFAULT_PAYROLL_SPEC")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let embedded_isolation = match layered.remove("EMBEDDED_ISOLATION") {
            Some(value) if !value.is_empty() => value.parse()?,
            _ => default_embedded_isolation(),
        };

        let degraded_policy = match layered.remove("DEGRADED_POLICY") {
            Some(value) if !value.is_empty() => value.parse()?,
            _ => default_degraded_policy(),
        };

        let single_tenant_id = layered
            .remove("SINGLE_TENANT_ID")
            .and_then(|v| v.trim().parse().ok());

        let tenant_path_pattern = layered
            .remove("TENANT_PATH_PATTERN")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_tenant_path_pattern);

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            db_path,
            seed_dir,
            default_payroll_spec,
            embedded_isolation,
            degraded_policy,
            single_tenant_id,
            tenant_path_pattern,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("TENANCY_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("TENANCY_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a connection string from individual `DB_*` settings when no explicit
/// `DATABASE_URL` is configured.
fn compose_database_url(
    layered: &mut BTreeMap<String, String>,
    db_path: &std::path::Path,
) -> Result<String, ConfigError> {
    let db_type = layered
        .remove("DB_TYPE")
        .unwrap_or_else(|| "sqlite".to_string())
        .to_ascii_lowercase();

    if db_type == "sqlite" {
        return Ok(format!(
            "sqlite://{}?mode=rwc",
            db_path.join("app.db").display()
        ));
    }

    let user = layered
        .remove("DB_USER")
        .unwrap_or_else(|| "postgres".to_string());
    let host = layered.remove("DB_HOST").unwrap_or_else(|| "db".to_string());
    let port = layered
        .remove("DB_PORT")
        .unwrap_or_else(|| "5432".to_string());
    let name = layered
        .remove("DB_NAME")
        .unwrap_or_else(|| "ledger".to_string());

    let raw = format!("postgresql://{host}:{port}/{name}");
    let mut url = Url::parse(&raw).map_err(|source| ConfigError::InvalidDatabaseUrl {
        value: raw.clone(),
        source,
    })?;
    let _ = url.set_username(&user);
    if let Some(password) = resolve_db_password(layered) {
        let _ = url.set_password(Some(&password));
    }

    Ok(url.to_string())
}

/// Secret files win over plain environment values.
fn resolve_db_password(layered: &mut BTreeMap<String, String>) -> Option<String> {
    for key in ["DB_PASSWORD_FILE", "POSTGRES_PASSWORD_FILE"] {
        if let Some(path) = layered.remove(key)
            && let Ok(contents) = fs::read_to_string(&path)
        {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    layered
        .remove("DB_PASSWORD")
        .or_else(|| layered.remove("DB_ROOT_PASSWORD"))
        .filter(|v| !v.is_empty())
}
