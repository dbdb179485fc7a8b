//! Configuration management
//!
//! Configuration is read from `config.yml` and may be overridden with
//! `CAREERHUB_*` environment variables. Missing values fall back to defaults,
//! so an absent or empty file yields a runnable development setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub password_reset: PasswordResetConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (cookie auth needs an explicit origin)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Interval of the background maintenance loop
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_seconds: u64,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            maintenance_interval_seconds: default_maintenance_interval(),
            trust_proxy_headers: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_maintenance_interval() -> u64 {
    60
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DatabaseDriver,
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/careerhub.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default, single-node deployments and tests)
    #[default]
    Sqlite,
    /// PostgreSQL
    Postgres,
}

/// Login session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_days")]
    pub ttl_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_session_ttl_days(),
        }
    }
}

fn default_session_ttl_days() -> i64 {
    7
}

/// In-process cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_capacity(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory backing the built-in object store
    #[serde(default = "default_storage_path")]
    pub local_path: PathBuf,
    /// Public base URL presigned links are issued against
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// HMAC key for presigned URLs
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,
    /// Lifetime of a presigned URL
    #[serde(default = "default_url_ttl")]
    pub url_ttl_seconds: i64,
    /// Maximum document size in bytes (default: 25MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_storage_path(),
            public_url: default_public_url(),
            bucket: default_bucket(),
            signing_secret: default_signing_secret(),
            url_ttl_seconds: default_url_ttl(),
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_public_url() -> String {
    "http://localhost:8080/storage".to_string()
}

fn default_bucket() -> String {
    "documents".to_string()
}

fn default_signing_secret() -> String {
    "change-me".to_string()
}

fn default_url_ttl() -> i64 {
    900
}

fn default_max_file_size() -> u64 {
    25 * 1024 * 1024
}

fn default_allowed_types() -> Vec<String> {
    vec![
        "application/pdf".to_string(),
        "application/msword".to_string(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
        "text/plain".to_string(),
        "image/png".to_string(),
        "image/jpeg".to_string(),
    ]
}

impl StorageConfig {
    /// Check if a MIME type is allowed
    pub fn is_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t.eq_ignore_ascii_case(mime_type))
    }
}

/// Mentor booking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// How long a slot lock holds a slot before it expires
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_minutes: i64,
    #[serde(default = "default_min_duration")]
    pub min_duration_minutes: i64,
    #[serde(default = "default_max_duration")]
    pub max_duration_minutes: i64,
    /// Minimum lead time between booking and session start
    #[serde(default = "default_min_notice")]
    pub min_notice_minutes: i64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lock_ttl_minutes: default_lock_ttl(),
            min_duration_minutes: default_min_duration(),
            max_duration_minutes: default_max_duration(),
            min_notice_minutes: default_min_notice(),
        }
    }
}

fn default_lock_ttl() -> i64 {
    5
}

fn default_min_duration() -> i64 {
    15
}

fn default_max_duration() -> i64 {
    240
}

fn default_min_notice() -> i64 {
    60
}

/// Password reset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetConfig {
    #[serde(default = "default_max_attempts_per_email")]
    pub max_attempts_per_email: i64,
    #[serde(default = "default_max_attempts_per_ip")]
    pub max_attempts_per_ip: i64,
    #[serde(default = "default_reset_window")]
    pub window_minutes: i64,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: i64,
    /// Link mailed to the user; the token is appended as `?token=`
    #[serde(default = "default_reset_url_base")]
    pub reset_url_base: String,
}

impl Default for PasswordResetConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_email: default_max_attempts_per_email(),
            max_attempts_per_ip: default_max_attempts_per_ip(),
            window_minutes: default_reset_window(),
            token_ttl_minutes: default_token_ttl(),
            reset_url_base: default_reset_url_base(),
        }
    }
}

fn default_max_attempts_per_email() -> i64 {
    3
}

fn default_max_attempts_per_ip() -> i64 {
    10
}

fn default_reset_window() -> i64 {
    60
}

fn default_token_ttl() -> i64 {
    30
}

fn default_reset_url_base() -> String {
    "http://localhost:3000/reset-password".to_string()
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Unread notifications sharing a group key are merged within this window
    #[serde(default = "default_group_window")]
    pub group_window_minutes: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            group_window_minutes: default_group_window(),
        }
    }
}

fn default_group_window() -> i64 {
    60
}

/// Outgoing mail configuration
///
/// With no `smtp_host` configured, mail is written to the log instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_mail_from")]
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from: default_mail_from(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_mail_from() -> String {
    "CareerHub <no-reply@careerhub.local>".to_string()
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Recognised variables:
    /// - CAREERHUB_SERVER_HOST / CAREERHUB_SERVER_PORT / CAREERHUB_SERVER_CORS_ORIGIN
    /// - CAREERHUB_SERVER_TRUST_PROXY_HEADERS
    /// - CAREERHUB_DATABASE_DRIVER / CAREERHUB_DATABASE_URL
    /// - CAREERHUB_STORAGE_SIGNING_SECRET / CAREERHUB_STORAGE_PUBLIC_URL
    /// - CAREERHUB_MAIL_SMTP_HOST / CAREERHUB_MAIL_FROM
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CAREERHUB_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CAREERHUB_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(origin) = std::env::var("CAREERHUB_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Ok(trust) = std::env::var("CAREERHUB_SERVER_TRUST_PROXY_HEADERS") {
            if let Ok(trust) = trust.parse::<bool>() {
                self.server.trust_proxy_headers = trust;
            }
        }

        if let Ok(driver) = std::env::var("CAREERHUB_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "postgres" | "postgresql" => self.database.driver = DatabaseDriver::Postgres,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("CAREERHUB_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(secret) = std::env::var("CAREERHUB_STORAGE_SIGNING_SECRET") {
            self.storage.signing_secret = secret;
        }
        if let Ok(url) = std::env::var("CAREERHUB_STORAGE_PUBLIC_URL") {
            self.storage.public_url = url;
        }

        if let Ok(host) = std::env::var("CAREERHUB_MAIL_SMTP_HOST") {
            self.mail.smtp_host = if host.trim().is_empty() { None } else { Some(host) };
        }
        if let Ok(from) = std::env::var("CAREERHUB_MAIL_FROM") {
            self.mail.from = from;
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "CAREERHUB_SERVER_HOST",
    "CAREERHUB_SERVER_PORT",
    "CAREERHUB_SERVER_CORS_ORIGIN",
    "CAREERHUB_SERVER_TRUST_PROXY_HEADERS",
    "CAREERHUB_DATABASE_DRIVER",
    "CAREERHUB_DATABASE_URL",
    "CAREERHUB_STORAGE_SIGNING_SECRET",
    "CAREERHUB_STORAGE_PUBLIC_URL",
    "CAREERHUB_MAIL_SMTP_HOST",
    "CAREERHUB_MAIL_FROM",
];
