//! Run coordination: schema phase, data phase, verification, reporting.

use crate::config::{Config, TargetConfig};
use crate::ddl;
use crate::error::{MigrateError, Result};
use crate::mover::{move_table, MoveOptions, TableCounts};
use crate::report::{MigrationReport, TableReport};
use crate::retry::with_retry;
use crate::source::{PgSource, TableDescriptor};
use crate::target::MssqlPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Connectivity probe result for both ends.
#[derive(Debug, serde::Serialize)]
pub struct HealthCheck {
    pub source_ok: bool,
    pub source_latency_ms: u64,
    pub target_ok: bool,
    pub target_latency_ms: u64,
}

impl HealthCheck {
    pub fn healthy(&self) -> bool {
        self.source_ok && self.target_ok
    }
}

/// Row-count comparison for one table. `target_rows` is `None` when the
/// table does not exist on the target.
#[derive(Debug, serde::Serialize)]
pub struct TableValidation {
    pub name: String,
    pub source_rows: i64,
    pub target_rows: Option<i64>,
}

impl TableValidation {
    pub fn matches(&self) -> bool {
        self.target_rows == Some(self.source_rows)
    }
}

/// Coordinates one migration run end to end.
///
/// Owns both pools explicitly; they are handed to workers by reference
/// counting, never through process-global state.
pub struct Orchestrator {
    config: Config,
    source: Arc<PgSource>,
    target: Arc<MssqlPool>,
}

impl Orchestrator {
    /// Connect both ends. Fails fast if either is unreachable.
    pub async fn new(config: Config, target_config: TargetConfig) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(PgSource::connect(&config.source).await?);
        let target = Arc::new(MssqlPool::connect(&target_config).await?);
        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Execute the full run: discover, create schema, move data, verify.
    ///
    /// One table's failure never aborts the run; it is recorded and the
    /// remaining tables proceed. Cancellation aborts promptly between
    /// batches and surfaces as [`MigrateError::Cancelled`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let opts = MoveOptions::from_config(&self.config.migration);
        let mut report = MigrationReport::new();
        info!("Starting migration run {}", report.run_id);

        let tables = self.discover_tables(&opts).await?;
        info!("Migrating {} tables: {:?}", tables.len(), tables);
        for name in &tables {
            report.tables.push(TableReport::new(name));
        }

        // Schema phase, in dependency order.
        let descriptors = self
            .schema_phase(&tables, &opts, &mut report, &cancel)
            .await?;

        // Data phase: bounded by the worker count, one table per task.
        let outcomes = self
            .data_phase(&tables, &descriptors, &opts, &mut report, &cancel)
            .await?;

        // Verification phase: compare row counts.
        for (name, counts) in &outcomes {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            match with_retry(
                || {
                    self.target
                        .count_rows(&opts.target_schema, name)
                },
                opts.max_attempts,
                opts.initial_delay,
            )
            .await
            {
                Ok(target_rows) => {
                    if let Some(entry) = report.table_mut(name) {
                        entry.mark_verified(counts.source_rows, target_rows);
                        if !entry.consistent {
                            warn!(
                                "{}: row count mismatch (source {}, target {})",
                                name, counts.source_rows, target_rows
                            );
                        }
                    }
                }
                Err(e) => {
                    error!("{}: verification failed: {}", name, e);
                    if let Some(entry) = report.table_mut(name) {
                        entry.mark_failed(format!("verification failed: {}", e));
                    }
                }
            }
        }

        report.complete();
        Ok(report)
    }

    /// List source tables in dependency order and apply the name filters.
    async fn discover_tables(&self, opts: &MoveOptions) -> Result<Vec<String>> {
        let all = with_retry(
            || self.source.list_tables(),
            opts.max_attempts,
            opts.initial_delay,
        )
        .await?;

        let include = &self.config.migration.include_tables;
        let exclude = &self.config.migration.exclude_tables;

        for wanted in include {
            if !all.contains(wanted) {
                return Err(MigrateError::catalog(format!(
                    "included table '{}' not found in source schema",
                    wanted
                )));
            }
        }

        Ok(all
            .into_iter()
            .filter(|t| include.is_empty() || include.contains(t))
            .filter(|t| !exclude.contains(t))
            .collect())
    }

    async fn schema_phase(
        &self,
        tables: &[String],
        opts: &MoveOptions,
        report: &mut MigrationReport,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, TableDescriptor>> {
        let schema_sql = ddl::create_schema(&opts.target_schema);
        with_retry(
            || self.target.execute_ddl(&schema_sql),
            opts.max_attempts,
            opts.initial_delay,
        )
        .await?;

        let mut descriptors = HashMap::new();
        for name in tables {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let descriptor = match self.source.describe_table(name).await {
                Ok(d) => d,
                Err(e) => {
                    error!("{}: introspection failed: {}", name, e);
                    if let Some(entry) = report.table_mut(name) {
                        entry.mark_failed(e.to_string());
                    }
                    continue;
                }
            };

            let table_sql = ddl::create_table(&descriptor, &opts.target_schema);
            let created = with_retry(
                || self.target.execute_ddl(&table_sql),
                opts.max_attempts,
                opts.initial_delay,
            )
            .await;

            match created {
                Ok(()) => {
                    if let Some(entry) = report.table_mut(name) {
                        entry.mark_schema_created();
                    }
                    descriptors.insert(name.clone(), descriptor);
                }
                Err(e) => {
                    error!("{}: create table failed: {}", name, e);
                    if let Some(entry) = report.table_mut(name) {
                        entry.mark_failed(e.to_string());
                    }
                }
            }
        }

        Ok(descriptors)
    }

    async fn data_phase(
        &self,
        tables: &[String],
        descriptors: &HashMap<String, TableDescriptor>,
        opts: &MoveOptions,
        report: &mut MigrationReport,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, TableCounts)>> {
        let workers = self.config.migration.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::new();

        // Spawn in dependency order; with one worker this degenerates to a
        // strictly sequential pass.
        for name in tables {
            let Some(descriptor) = descriptors.get(name) else {
                continue;
            };

            let source = Arc::clone(&self.source);
            let target = Arc::clone(&self.target);
            let descriptor = descriptor.clone();
            let opts = opts.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let name = name.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| MigrateError::pool(e.to_string(), "acquiring worker slot"));
                let result = match _permit {
                    Ok(_permit) => {
                        tokio::select! {
                            _ = cancel.cancelled() => Err(MigrateError::Cancelled),
                            res = move_table(&source, &target, &descriptor, &opts) => res,
                        }
                    }
                    Err(e) => Err(e),
                };
                (name, result)
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            let (name, result) = handle
                .await
                .map_err(|e| MigrateError::pool(e.to_string(), "joining worker task"))?;
            match result {
                Ok(counts) => {
                    if let Some(entry) = report.table_mut(&name) {
                        entry.mark_data_migrated(counts.rows_written);
                        entry.conversion_failures = counts.conversion_failures.clone();
                    }
                    outcomes.push((name, counts));
                }
                Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
                Err(e) => {
                    error!("{}: data move failed: {}", name, e);
                    if let Some(entry) = report.table_mut(&name) {
                        entry.mark_failed(e.to_string());
                    }
                }
            }
        }

        Ok(outcomes)
    }

    /// Compare per-table row counts between source and target without
    /// moving any data.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let opts = MoveOptions::from_config(&self.config.migration);
        let tables = self.discover_tables(&opts).await?;

        let mut results = Vec::with_capacity(tables.len());
        for name in &tables {
            let source_rows = self.source.count_rows(name).await?;
            let target_rows = if self.target.table_exists(&opts.target_schema, name).await? {
                Some(self.target.count_rows(&opts.target_schema, name).await?)
            } else {
                None
            };
            results.push(TableValidation {
                name: name.clone(),
                source_rows,
                target_rows,
            });
        }
        Ok(results)
    }

    /// Probe both ends and report latency.
    pub async fn health_check(&self) -> HealthCheck {
        let started = Instant::now();
        let source_ok = self.source.health_check().await.is_ok();
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target_ok = self.target.health_check().await.is_ok();
        let target_latency_ms = started.elapsed().as_millis() as u64;

        HealthCheck {
            source_ok,
            source_latency_ms,
            target_ok,
            target_latency_ms,
        }
    }

    /// Tear down both pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}
