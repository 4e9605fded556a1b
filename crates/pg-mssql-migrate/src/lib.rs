//! One-shot schema and data migration from PostgreSQL to SQL Server.
//!
//! The library introspects the source schema through the information
//! catalog, recreates tables on the target in dependency order with
//! existence-guarded DDL, then moves rows in batched transactions using a
//! keyed upsert so a re-run converges instead of duplicating data. Every
//! run ends with a per-table verification and a summary report.
//!
//! Entry point is [`Orchestrator`]: build it from a [`Config`] plus a
//! [`TargetConfig`] (taken from the `TARGET_DB_URL` environment variable)
//! and call [`Orchestrator::run`].

pub mod config;
pub mod ddl;
pub mod error;
pub mod mover;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod source;
pub mod target;
pub mod translate;

pub use config::{Config, ConversionPolicy, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheck, Orchestrator, TableValidation};
pub use report::{MigrationReport, TableReport, TableState};
pub use source::{ColumnDescriptor, PgSource, TableDescriptor};
pub use target::{MssqlPool, SqlNullType, SqlValue};
