//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure loaded from YAML.
///
/// The target connection is deliberately absent here: it is supplied through
/// the `TARGET_DB_URL` environment variable (see [`crate::config::TargetConfig::from_env`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    pub source: SourceConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Source schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Target database (SQL Server) configuration, parsed from a `mssql://` URL.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Target schema (default: "dbo"; overridable in migration config).
    pub schema: String,

    /// Encrypt connection. `false` is rejected at parse time.
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    pub trust_server_cert: bool,

    /// Maximum pool size (default: 4).
    pub max_pool_size: u32,

    /// Connection timeout in seconds (default: 15).
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_pool_size", &self.max_pool_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per batch; one target transaction per batch (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent table moves during the data phase (default: 1, sequential).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Retry attempts for catalog queries, DDL and batch transactions (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled after each failed attempt
    /// (default: 500).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// What to do when a single column value fails conversion.
    #[serde(default)]
    pub on_conversion_error: ConversionPolicy,

    /// Tables to migrate (exact names). Empty means all tables.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to skip (exact names).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Target schema override. Defaults to "dbo".
    #[serde(default = "default_dbo_schema")]
    pub target_schema: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            retry_initial_delay_ms: default_retry_delay_ms(),
            on_conversion_error: ConversionPolicy::default(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            target_schema: default_dbo_schema(),
        }
    }
}

/// Policy for per-column conversion failures during the data move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPolicy {
    /// Omit the failing column from that row's insert; record the failure
    /// in the migration report.
    #[default]
    Skip,

    /// Abort the table on the first conversion failure.
    Fail,
}

// Default value functions for serde

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_workers() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}
