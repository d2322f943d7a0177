//! Configuration loading, validation, and management for the Lens server.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`DATABASE_URL`, `JWT_SECRET`, `ENVIRONMENT`, `PORT`,
//! `LENS_HOST`). Validates all settings at startup; validation failures are
//! fatal and map to a non-zero exit code in the binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Minimum JWT secret length enforced in production.
const MIN_JWT_SECRET_BYTES: usize = 32;

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment: "development" or "production".
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Custom per-million-token pricing overrides (model name -> pricing),
    /// merged over the built-in catalog at startup.
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_environment() -> String {
    "development".into()
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("server", &self.server)
            .field("database", &self.database)
            .field("auth", &self.auth)
            .field("custom_pricing", &self.custom_pricing)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3340
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string. The URL scheme selects the backend family:
    /// `sqlite://`, `postgres://` / `postgresql://`, `clickhouse://` /
    /// `clickhouses://`; any other string is treated as a SQLite file path.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Pool floor for networked row stores.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Pool ceiling for networked row stores.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://lens.db".into()
}
fn default_min_connections() -> u32 {
    5
}
fn default_max_connections() -> u32 {
    25
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for dashboard session JWTs.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Session token lifetime in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

fn default_jwt_secret() -> String {
    // Development-only fallback; production requires an explicit secret.
    "lens-development-secret-do-not-use".into()
}
fn default_token_ttl_hours() -> u64 {
    24 * 7
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .finish()
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    pub input_per_m: f64,
    pub output_per_m: f64,
    #[serde(default)]
    pub cache_read_per_m: f64,
    #[serde(default)]
    pub cache_write_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the given path (if any), then apply
    /// environment variable overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::default(),
        };

        if let Ok(env) = std::env::var("ENVIRONMENT") {
            config.environment = env;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Validation(format!("PORT is not a number: {port}")))?;
        }
        if let Ok(host) = std::env::var("LENS_HOST") {
            config.server.host = host;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Whether this deployment is production.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validate the configuration. Called by `load`; exposed for tests and
    /// for the `migrate` subcommand which bypasses `load`'s env handling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0
            || self.database.min_connections > self.database.max_connections
        {
            return Err(ConfigError::Validation(
                "database.min_connections must be <= max_connections, and max > 0".into(),
            ));
        }
        if self.is_production() {
            if self.auth.jwt_secret.len() < MIN_JWT_SECRET_BYTES {
                return Err(ConfigError::Validation(format!(
                    "JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes in production"
                )));
            }
            if self.auth.jwt_secret == default_jwt_secret() {
                return Err(ConfigError::Validation(
                    "JWT_SECRET must be set explicitly in production".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            custom_pricing: HashMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3340);
        assert_eq!(config.database.min_connections, 5);
        assert_eq!(config.database.max_connections, 25);
        assert!(!config.is_production());
    }

    #[test]
    fn production_requires_long_explicit_secret() {
        let mut config = AppConfig::default();
        config.environment = "production".into();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "short".into();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "a-sufficiently-long-production-secret-value".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut config = AppConfig::default();
        config.database.min_connections = 30;
        assert!(config.validate().is_err());
        config.database.min_connections = 5;
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.database.url, config.database.url);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/lens.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().server.port, 3340);
    }

    #[test]
    fn custom_pricing_parses() {
        let toml_str = r#"
[custom_pricing."acme/instant-1"]
input_per_m = 1.5
output_per_m = 6.0
cache_read_per_m = 0.15
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let p = &config.custom_pricing["acme/instant-1"];
        assert_eq!(p.input_per_m, 1.5);
        assert_eq!(p.cache_write_per_m, 0.0);
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AppConfig::default();
        let dbg = format!("{config:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("development-secret"));
    }
}
