//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing env var, insecure URL, etc.)
    /// Raised before any I/O; never caught internally.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source catalog query failed or returned an unexpected shape.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Source database connection or query error.
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Target database connection or query error.
    #[error("Target database error: {0}")]
    Target(#[from] tiberius::error::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// One or more rows in a batch failed to insert; the batch was rolled back.
    #[error("Batch insert failed for table {table}: {message}")]
    Batch { table: String, message: String },

    /// A column value could not be converted for the target under fail-fast policy.
    #[error("Conversion failed for {table}.{column}: {message}")]
    Conversion {
        table: String,
        column: String,
        message: String,
    },

    /// The run completed but one or more tables failed.
    #[error("{failed} of {total} tables failed to migrate")]
    TablesFailed { failed: usize, total: usize },

    /// Migration was cancelled (SIGINT/SIGTERM).
    #[error("Migration cancelled")]
    Cancelled,

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Catalog error.
    pub fn catalog(message: impl Into<String>) -> Self {
        MigrateError::Catalog(message.into())
    }

    /// Create a Batch error.
    pub fn batch(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Batch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_failed_is_nonzero_exit() {
        let err = MigrateError::TablesFailed {
            failed: 2,
            total: 5,
        };
        assert_eq!(err.to_string(), "2 of 5 tables failed to migrate");
        assert_eq!(err.exit_code(), 1);
    }
}
