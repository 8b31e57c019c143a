//! Centralized constants for the MSSQL MCP bridge.
//!
//! Default values for every environment-driven setting live here so they are
//! easy to find and change in one place.

use std::time::Duration;

// =============================================================================
// Connection Constants
// =============================================================================

/// Default SQL Server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Default database used when a call names none.
pub const DEFAULT_DATABASE: &str = "master";

/// Application name reported to SQL Server.
pub const DEFAULT_APPLICATION_NAME: &str = "mssql-mcp-bridge";

/// Default connection timeout in milliseconds.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Extra time granted on top of the connection timeout before a pool
/// creation attempt is abandoned.
pub const CONNECT_DEADLINE_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Connection Pool Constants
// =============================================================================

/// Default minimum idle connections in pool.
pub const DEFAULT_POOL_MIN: u32 = 0;

/// Default maximum connections in pool.
pub const DEFAULT_POOL_MAX: u32 = 10;

/// Default connection idle timeout in milliseconds.
pub const DEFAULT_POOL_IDLE_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Retry Constants
// =============================================================================

/// Default number of pool creation attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default upper bound on a retry delay in milliseconds.
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Maximum jitter added to a backoff delay, as a fraction of the base delay.
pub const RETRY_JITTER_FRACTION: f64 = 0.1;

// =============================================================================
// Cache Constants
// =============================================================================

/// Default schema cache TTL in milliseconds (5 minutes).
pub const DEFAULT_SCHEMA_CACHE_TTL_MS: u64 = 300_000;

// =============================================================================
// Security Constants
// =============================================================================

/// Default maximum accepted query length in characters.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 1_000_000;

/// Case-insensitive substrings rejected in ad-hoc queries.
pub const BLOCKED_PATTERNS: &[&str] = &[
    "exec ",
    "execute ",
    "sp_",
    "xp_",
    "reconfigure",
    "waitfor delay",
];

// =============================================================================
// Stored Procedure Constants
// =============================================================================

/// Variable capturing the procedure return code.
pub const RETURN_VALUE_COLUMN: &str = "__return_value";

/// Variable capturing the procedure row count.
pub const ROWS_AFFECTED_COLUMN: &str = "__rows_affected";

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;

/// Default tracing filter when RUST_LOG is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,mssql_mcp_bridge=info";
