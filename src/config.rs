//! Configuration management for the MSSQL MCP bridge.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.

use crate::constants::{
    DEFAULT_APPLICATION_NAME, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_DATABASE, DEFAULT_HOST,
    DEFAULT_MAX_QUERY_LENGTH, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY_MS,
    DEFAULT_POOL_IDLE_TIMEOUT_MS, DEFAULT_POOL_MAX, DEFAULT_POOL_MIN, DEFAULT_PORT,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_DELAY_MS, DEFAULT_SCHEMA_CACHE_TTL_MS,
};
use crate::error::ServerError;
use crate::resilience::RetryConfig;
use std::str::FromStr;
use std::time::Duration;

/// Bridge configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Pool creation retry policy
    pub retry: RetryConfig,

    /// Security configuration
    pub security: SecurityConfig,

    /// Schema cache configuration
    pub cache: CacheConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQL Server hostname or IP address
    pub host: String,

    /// SQL Server port (default: 1433)
    pub port: u16,

    /// SQL login name. Checked when the pool is created, not at load time.
    pub user: Option<String>,

    /// SQL login password.
    pub password: Option<String>,

    /// Default database for calls that name none
    pub database: String,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// Application name sent to SQL Server
    pub application_name: String,

    /// Time allowed to open a connection
    pub connection_timeout: Duration,

    /// Time allowed for a single query or procedure call
    pub request_timeout: Duration,

    /// Connection pool configuration
    pub pool: PoolConfig,
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Minimum number of idle connections kept open
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Idle connection timeout
    pub idle_timeout: Duration,
}

/// Security configuration.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Databases callers may target. Empty disables the check.
    pub allowed_databases: Vec<String>,

    /// Maximum query length in characters
    pub max_query_length: usize,
}

/// Schema cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a fetched schema stays valid
    pub schema_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SQL_SERVER`: hostname (default: localhost)
    /// - `SQL_PORT`: port number (default: 1433)
    /// - `SQL_USER` / `SQL_PASSWORD`: SQL Server login
    /// - `SQL_DATABASE`: default database (default: master)
    /// - `SQL_ENCRYPT`: enable TLS (default: true)
    /// - `SQL_TRUST_SERVER_CERTIFICATE`: trust self-signed certs (default: false)
    /// - `SQL_CONNECTION_TIMEOUT_MS` / `SQL_REQUEST_TIMEOUT_MS`: timeouts (default: 30000)
    /// - `SQL_POOL_MIN` / `SQL_POOL_MAX`: pool bounds (default: 0 / 10)
    /// - `SQL_POOL_IDLE_TIMEOUT_MS`: idle timeout (default: 30000)
    /// - `SQL_MAX_RETRIES`: pool creation attempts (default: 3)
    /// - `SQL_RETRY_DELAY_MS` / `SQL_MAX_RETRY_DELAY_MS`: backoff bounds (default: 1000 / 30000)
    /// - `SQL_SCHEMA_CACHE_TTL_MS`: schema cache TTL (default: 300000)
    /// - `SQL_ALLOWED_DATABASES`: comma-separated whitelist (default: empty, disabled)
    /// - `SQL_MAX_QUERY_LENGTH`: maximum query length (default: 1000000)
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("SQL_SERVER").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_var(&get, "SQL_PORT", DEFAULT_PORT)?;
        let user = get("SQL_USER");
        let password = get("SQL_PASSWORD");
        let database = get("SQL_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let encrypt = parse_bool(&get, "SQL_ENCRYPT", true)?;
        let trust_server_certificate = parse_bool(&get, "SQL_TRUST_SERVER_CERTIFICATE", false)?;

        let connection_timeout =
            parse_millis(&get, "SQL_CONNECTION_TIMEOUT_MS", DEFAULT_CONNECTION_TIMEOUT_MS)?;
        let request_timeout =
            parse_millis(&get, "SQL_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;

        let min_connections = parse_var(&get, "SQL_POOL_MIN", DEFAULT_POOL_MIN)?;
        let max_connections = parse_var(&get, "SQL_POOL_MAX", DEFAULT_POOL_MAX)?;
        if max_connections == 0 || min_connections > max_connections {
            return Err(ServerError::validation(format!(
                "Invalid pool bounds: min {} max {}",
                min_connections, max_connections
            ))
            .with_detail("variable", "SQL_POOL_MAX"));
        }
        let idle_timeout =
            parse_millis(&get, "SQL_POOL_IDLE_TIMEOUT_MS", DEFAULT_POOL_IDLE_TIMEOUT_MS)?;

        let max_attempts = parse_var(&get, "SQL_MAX_RETRIES", DEFAULT_MAX_RETRIES)?.max(1);
        let initial_delay = parse_millis(&get, "SQL_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?;
        let max_delay = parse_millis(&get, "SQL_MAX_RETRY_DELAY_MS", DEFAULT_MAX_RETRY_DELAY_MS)?;

        let schema_ttl =
            parse_millis(&get, "SQL_SCHEMA_CACHE_TTL_MS", DEFAULT_SCHEMA_CACHE_TTL_MS)?;

        let allowed_databases = get("SQL_ALLOWED_DATABASES")
            .map(|list| parse_list(&list))
            .unwrap_or_default();
        let max_query_length =
            parse_var(&get, "SQL_MAX_QUERY_LENGTH", DEFAULT_MAX_QUERY_LENGTH)?;

        Ok(Config {
            database: DatabaseConfig {
                host,
                port,
                user,
                password,
                database,
                encrypt,
                trust_server_certificate,
                application_name: DEFAULT_APPLICATION_NAME.to_string(),
                connection_timeout,
                request_timeout,
                pool: PoolConfig {
                    min_connections,
                    max_connections,
                    idle_timeout,
                },
            },
            retry: RetryConfig {
                max_attempts,
                initial_delay,
                max_delay,
                jitter: true,
            },
            security: SecurityConfig {
                allowed_databases,
                max_query_length,
            },
            cache: CacheConfig { schema_ttl },
        })
    }

    /// Get the default database name.
    pub fn default_database(&self) -> &str {
        &self.database.database
    }
}

fn parse_var<T, F>(get: &F, key: &str, default: T) -> Result<T, ServerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| {
            ServerError::validation(format!("Invalid value for {}: {}", key, e))
                .with_detail("variable", key)
                .with_detail("value", raw)
        }),
    }
}

fn parse_millis<F>(get: &F, key: &str, default_ms: u64) -> Result<Duration, ServerError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(get, key, default_ms).map(Duration::from_millis)
}

fn parse_bool<F>(get: &F, key: &str, default: bool) -> Result<bool, ServerError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(ServerError::validation(format!(
            "Invalid boolean for {}: {}",
            key, other
        ))
        .with_detail("variable", key)),
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            database: DEFAULT_DATABASE.to_string(),
            encrypt: true,
            trust_server_certificate: false,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            connection_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_POOL_MIN,
            max_connections: DEFAULT_POOL_MAX,
            idle_timeout: Duration::from_millis(DEFAULT_POOL_IDLE_TIMEOUT_MS),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_databases: Vec::new(),
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schema_ttl: Duration::from_millis(DEFAULT_SCHEMA_CACHE_TTL_MS),
        }
    }
}
