// Configuration sourced from the process environment (optionally seeded from .env)

use config::{Config, ConfigError, Environment, Map};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the backend process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub observability: ObservabilityConfig,
}

/// Connection pool settings, read from `DB_*` variables
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name", rename = "name")]
    pub database: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    /// `None` when `DB_PASSWORD` is unset; `Some("")` when it is set but blank
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_leak_threshold_seconds")]
    pub leak_threshold_seconds: u64,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "portfolio_analytics".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_idle_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    2
}

fn default_leak_threshold_seconds() -> u64 {
    5
}

/// Connection settings that are safe to log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactedDatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: &'static str,
}

impl DatabaseConfig {
    /// Read `DB_*` variables from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section(Environment::with_prefix("DB"))
    }

    /// Read `DB_*` variables from an explicit set instead of the process environment
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        load_section(Environment::with_prefix("DB").source(Some(vars.into_iter().collect())))
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn leak_threshold(&self) -> Duration {
        Duration::from_secs(self.leak_threshold_seconds)
    }

    /// Copy of the settings pointed at another database on the same server
    pub fn for_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// Connection settings with the password reduced to a presence marker
    pub fn redacted(&self) -> RedactedDatabaseConfig {
        let password = match self.password.as_deref() {
            None => "(not set)",
            Some("") => "(empty)",
            Some(_) => "***",
        };

        RedactedDatabaseConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Database host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("Database port must be greater than 0".to_string());
        }
        if self.database.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.connect_timeout_seconds == 0 {
            return Err("Database connect_timeout_seconds must be greater than 0".to_string());
        }
        if self.leak_threshold_seconds == 0 {
            return Err("Database leak_threshold_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.redacted().password)
            .field("max_connections", &self.max_connections)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("leak_threshold_seconds", &self.leak_threshold_seconds)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            user: default_db_user(),
            password: None,
            max_connections: default_max_connections(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            leak_threshold_seconds: default_leak_threshold_seconds(),
        }
    }
}

/// HTTP listener settings for the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_health_check_timeout_seconds")]
    pub health_check_timeout_seconds: u64,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3001
}

fn default_health_check_timeout_seconds() -> u64 {
    5
}

impl ServerConfig {
    /// `BACKEND_*` variables, with the conventional `PORT` taking precedence
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_parts(Environment::with_prefix("BACKEND"), std::env::var("PORT").ok())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Map<String, String> = vars.into_iter().collect();
        let port = vars.get("PORT").cloned();
        Self::from_parts(Environment::with_prefix("BACKEND").source(Some(vars)), port)
    }

    fn from_parts(env: Environment, port: Option<String>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(env)
            .set_override_option("port", port)?
            .build()?
            .try_deserialize()
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            health_check_timeout_seconds: default_health_check_timeout_seconds(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl ObservabilityConfig {
    /// `LOG_LEVEL` and `LOG_FORMAT`
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section(Environment::with_prefix("LOG")).map(Self::rename_fields)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        load_section(Environment::with_prefix("LOG").source(Some(vars.into_iter().collect())))
            .map(Self::rename_fields)
    }

    fn rename_fields(raw: RawObservability) -> Self {
        Self {
            log_level: raw.level,
            log_format: raw.format,
        }
    }
}

#[derive(Deserialize)]
struct RawObservability {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default = "default_log_format")]
    format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Readiness gate and shell launch settings, read from `LAUNCHER_*` variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
    #[serde(default = "default_shell_program")]
    pub shell_program: String,
    /// Whitespace-separated arguments for the shell program
    #[serde(default = "default_shell_args")]
    pub shell_args: String,
    /// Exported to the shell as `NODE_ENV`
    #[serde(default = "default_shell_mode")]
    pub shell_mode: String,
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:3001/api/health".to_string()
}

fn default_max_wait_seconds() -> u64 {
    60
}

fn default_check_interval_seconds() -> u64 {
    2
}

fn default_probe_timeout_seconds() -> u64 {
    2
}

fn default_shell_program() -> String {
    "electron".to_string()
}

fn default_shell_args() -> String {
    ".".to_string()
}

fn default_shell_mode() -> String {
    "development".to_string()
}

impl LauncherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_section(Environment::with_prefix("LAUNCHER"))
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        load_section(Environment::with_prefix("LAUNCHER").source(Some(vars.into_iter().collect())))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn shell_args(&self) -> Vec<String> {
        self.shell_args.split_whitespace().map(str::to_string).collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.frontend_url.is_empty() || self.backend_url.is_empty() {
            return Err("Launcher endpoint URLs cannot be empty".to_string());
        }
        if self.max_wait_seconds == 0 {
            return Err("Launcher max_wait_seconds must be greater than 0".to_string());
        }
        if self.check_interval_seconds == 0 {
            return Err("Launcher check_interval_seconds must be greater than 0".to_string());
        }
        if self.probe_timeout_seconds == 0 {
            return Err("Launcher probe_timeout_seconds must be greater than 0".to_string());
        }
        if self.shell_program.is_empty() {
            return Err("Launcher shell_program cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            frontend_url: default_frontend_url(),
            backend_url: default_backend_url(),
            max_wait_seconds: default_max_wait_seconds(),
            check_interval_seconds: default_check_interval_seconds(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
            shell_program: default_shell_program(),
            shell_args: default_shell_args(),
            shell_mode: default_shell_mode(),
        }
    }
}

impl Settings {
    /// Load backend settings from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            observability: ObservabilityConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }
        self.database.validate()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Seed the process environment from `.env` in the working directory or its parents
///
/// Variables already present in the environment win over the file.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => {
            tracing::warn!("No .env file found; using process environment only");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not load .env file");
            None
        }
    }
}

fn load_section<T: DeserializeOwned>(env: Environment) -> Result<T, ConfigError> {
    Config::builder().add_source(env).build()?.try_deserialize()
}
