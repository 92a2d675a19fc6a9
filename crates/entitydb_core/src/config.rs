//! Configuration for the EntityDB core and the layers above it.
//!
//! Sections load from `config.toml` under the data root and may be
//! overridden by `ENTITYDB_`-prefixed environment variables. The core
//! consumes the storage/session/security sections; transport-facing
//! values (SSL, ports, HTTP timeouts, throttling) are carried here as
//! data for the out-of-scope surfaces.

use crate::error::{EntityDbError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Comprehensive configuration for an EntityDB deployment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Storage paths and data file naming.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Listener and TLS settings for the serving layer.
    #[serde(default)]
    pub server: ServerConfig,

    /// Tokens, sessions, password hashing, default admin.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Log level and trace subsystems.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Request throttling knobs for the serving layer.
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Fixed-window rate limiting for the serving layer.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// HTTP timeout budget for the serving layer.
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Loads configuration from `config.toml` under the data root,
    /// falling back to defaults, then applies environment overrides.
    pub fn load(data_root: &Path) -> Result<Self> {
        let path = data_root.join("config.toml");
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| EntityDbError::ConfigError(format!("failed to read config: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| EntityDbError::ConfigError(format!("failed to parse config: {e}")))?
        } else {
            Config::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Builds a configuration purely from defaults plus the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Saves the configuration to `config.toml` under the data root.
    pub fn save(&self, data_root: &Path) -> Result<()> {
        let path = data_root.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| EntityDbError::ConfigError(format!("failed to serialize config: {e}")))?;
        fs::write(&path, content)
            .map_err(|e| EntityDbError::ConfigError(format!("failed to write config: {e}")))?;
        Ok(())
    }

    /// Applies `ENTITYDB_*` environment overrides in place.
    pub fn apply_env(&mut self) -> Result<()> {
        override_string("ENTITYDB_DATA_PATH", &mut self.storage.data_path);
        override_string("ENTITYDB_DATABASE_FILENAME", &mut self.storage.database_filename);
        override_string("ENTITYDB_BACKUP_PATH", &mut self.storage.backup_path);
        override_string("ENTITYDB_TEMP_PATH", &mut self.storage.temp_path);

        override_bool("ENTITYDB_USE_SSL", &mut self.server.use_ssl)?;
        override_string("ENTITYDB_SSL_CERT", &mut self.server.ssl_cert);
        override_string("ENTITYDB_SSL_KEY", &mut self.server.ssl_key);
        override_number("ENTITYDB_PORT", &mut self.server.port)?;
        override_number("ENTITYDB_SSL_PORT", &mut self.server.ssl_port)?;

        override_string("ENTITYDB_SYSTEM_USER_ID", &mut self.security.system_user_id);
        override_string("ENTITYDB_TOKEN_SECRET", &mut self.security.token_secret);
        override_number(
            "ENTITYDB_SESSION_TTL_HOURS",
            &mut self.security.session_ttl_hours,
        )?;
        override_number(
            "ENTITYDB_PASSWORD_HASH_COST",
            &mut self.security.password_hash_cost,
        )?;
        override_string(
            "ENTITYDB_DEFAULT_ADMIN_USERNAME",
            &mut self.security.default_admin_username,
        );
        override_string(
            "ENTITYDB_DEFAULT_ADMIN_PASSWORD",
            &mut self.security.default_admin_password,
        );
        override_string(
            "ENTITYDB_DEFAULT_ADMIN_EMAIL",
            &mut self.security.default_admin_email,
        );

        override_string("ENTITYDB_LOG_LEVEL", &mut self.logging.log_level);
        override_string("ENTITYDB_TRACE_SUBSYSTEMS", &mut self.logging.trace_subsystems);
        override_bool("ENTITYDB_DEV_MODE", &mut self.logging.dev_mode)?;

        override_bool("ENTITYDB_THROTTLE_ENABLED", &mut self.throttle.enabled)?;
        override_number(
            "ENTITYDB_THROTTLE_REQUESTS_PER_MINUTE",
            &mut self.throttle.requests_per_minute,
        )?;
        override_number(
            "ENTITYDB_THROTTLE_POLLING_THRESHOLD",
            &mut self.throttle.polling_threshold,
        )?;
        override_number(
            "ENTITYDB_THROTTLE_MAX_DELAY_MS",
            &mut self.throttle.max_delay_ms,
        )?;
        override_number(
            "ENTITYDB_THROTTLE_CACHE_DURATION_SECS",
            &mut self.throttle.cache_duration_secs,
        )?;

        override_number("ENTITYDB_RATE_LIMIT_REQUESTS", &mut self.rate_limit.requests)?;
        override_number(
            "ENTITYDB_RATE_LIMIT_WINDOW_MINUTES",
            &mut self.rate_limit.window_minutes,
        )?;

        override_number("ENTITYDB_HTTP_READ_TIMEOUT_SECS", &mut self.http.read_timeout_secs)?;
        override_number(
            "ENTITYDB_HTTP_WRITE_TIMEOUT_SECS",
            &mut self.http.write_timeout_secs,
        )?;
        override_number("ENTITYDB_HTTP_IDLE_TIMEOUT_SECS", &mut self.http.idle_timeout_secs)?;
        override_number(
            "ENTITYDB_HTTP_SHUTDOWN_TIMEOUT_SECS",
            &mut self.http.shutdown_timeout_secs,
        )?;

        Ok(())
    }
}

/// Storage paths and data file naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory root.
    pub data_path: String,
    /// Name of the unified data file.
    pub database_filename: String,
    /// Backup directory.
    pub backup_path: String,
    /// Scratch directory for streaming imports.
    pub temp_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: "./var/entitydb".into(),
            database_filename: "entitydb.redb".into(),
            backup_path: "./var/entitydb/backups".into(),
            temp_path: "./var/entitydb/tmp".into(),
        }
    }
}

/// Listener and TLS settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Serve over TLS.
    pub use_ssl: bool,
    /// Certificate path.
    pub ssl_cert: String,
    /// Private key path.
    pub ssl_key: String,
    /// Plain listener port.
    pub port: u16,
    /// TLS listener port.
    pub ssl_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            use_ssl: false,
            ssl_cert: String::new(),
            ssl_key: String::new(),
            port: 8085,
            ssl_port: 8443,
        }
    }
}

/// Tokens, sessions, password hashing, default admin account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Reserved id of the system user, the ownership root.
    pub system_user_id: String,
    /// Secret mixed into session token generation.
    pub token_secret: String,
    /// Session lifetime in hours (default 2).
    pub session_ttl_hours: u64,
    /// Cost parameter for the password hasher.
    pub password_hash_cost: u32,
    /// Admin account created at bootstrap if absent.
    pub default_admin_username: String,
    /// Initial admin password.
    pub default_admin_password: String,
    /// Admin contact recorded on the entity.
    pub default_admin_email: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            system_user_id: "00000000000000000000000000000001".into(),
            token_secret: String::new(),
            session_ttl_hours: 2,
            password_hash_cost: 12,
            default_admin_username: "admin".into(),
            default_admin_password: "admin".into(),
            default_admin_email: "admin@localhost".into(),
        }
    }
}

impl SecurityConfig {
    /// Session lifetime as a Duration.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours * 3600)
    }
}

/// Log level and trace subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Comma-separated subsystems with tracing forced on.
    pub trace_subsystems: String,
    /// Development mode (richer errors, relaxed CORS upstream).
    pub dev_mode: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            trace_subsystems: String::new(),
            dev_mode: false,
        }
    }
}

/// Request throttling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Master switch.
    pub enabled: bool,
    /// Sustained request budget per client.
    pub requests_per_minute: u64,
    /// Requests per minute that start counting as polling.
    pub polling_threshold: u64,
    /// Cap for the injected delay.
    pub max_delay_ms: u64,
    /// How long a client's throttle verdict is cached.
    pub cache_duration_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 600,
            polling_threshold: 120,
            max_delay_ms: 2_000,
            cache_duration_secs: 30,
        }
    }
}

/// Fixed-window rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub requests: u64,
    /// Window length in minutes.
    pub window_minutes: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 6_000,
            window_minutes: 1,
        }
    }
}

/// HTTP timeout budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Write timeout in seconds.
    pub write_timeout_secs: u64,
    /// Idle keep-alive timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Graceful shutdown budget in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            idle_timeout_secs: 60,
            shutdown_timeout_secs: 30,
        }
    }
}

fn override_string(name: &str, slot: &mut String) {
    if let Ok(value) = env::var(name) {
        *slot = value;
    }
}

fn override_bool(name: &str, slot: &mut bool) -> Result<()> {
    if let Ok(value) = env::var(name) {
        *slot = match value.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(EntityDbError::ConfigError(format!(
                    "{name}: expected a boolean, got {other:?}"
                )))
            }
        };
    }
    Ok(())
}

fn override_number<T: std::str::FromStr>(name: &str, slot: &mut T) -> Result<()> {
    if let Ok(value) = env::var(name) {
        *slot = value.parse().map_err(|_| {
            EntityDbError::ConfigError(format!("{name}: expected a number, got {value:?}"))
        })?;
    }
    Ok(())
}
