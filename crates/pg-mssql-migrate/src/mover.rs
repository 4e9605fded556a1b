//! Batched data movement for one table.

use crate::config::{ConversionPolicy, MigrationConfig};
use crate::error::{MigrateError, Result};
use crate::report::ConversionFailure;
use crate::retry::with_retry;
use crate::source::{PgSource, TableDescriptor};
use crate::target::{MssqlPool, SqlValue};
use crate::translate::value_from_row;
use std::time::Duration;
use tracing::{info, warn};

/// Knobs for one table move, derived from [`MigrationConfig`].
#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub batch_size: usize,
    pub target_schema: String,
    pub policy: ConversionPolicy,
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl MoveOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            target_schema: config.target_schema.clone(),
            policy: config.on_conversion_error,
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
        }
    }
}

/// Counts produced by one table move.
#[derive(Debug, Default)]
pub struct TableCounts {
    pub source_rows: i64,
    pub rows_written: u64,
    pub conversion_failures: Vec<ConversionFailure>,
}

/// Move one table's rows in batches, each batch its own target transaction.
///
/// Paging is offset-based over a stable key order, so a batch retry re-reads
/// the same window and the keyed upsert on the target keeps re-runs
/// idempotent.
pub async fn move_table(
    source: &PgSource,
    target: &MssqlPool,
    table: &TableDescriptor,
    opts: &MoveOptions,
) -> Result<TableCounts> {
    let mut counts = TableCounts::default();

    counts.source_rows = with_retry(
        || source.count_rows(&table.name),
        opts.max_attempts,
        opts.initial_delay,
    )
    .await?;

    if counts.source_rows == 0 {
        info!("{}: source is empty, nothing to move", table.name);
        return Ok(counts);
    }

    let batch_size = opts.batch_size as i64;
    let mut offset: i64 = 0;

    while offset < counts.source_rows {
        let rows = with_retry(
            || source.fetch_page(table, offset, batch_size),
            opts.max_attempts,
            opts.initial_delay,
        )
        .await?;

        if rows.is_empty() {
            // Source shrank under us; the verify step reports the drift.
            break;
        }
        let page_len = rows.len();

        let mut batch: Vec<Vec<Option<SqlValue>>> = Vec::with_capacity(page_len);
        for (row_idx, row) in rows.iter().enumerate() {
            let mut converted: Vec<Option<SqlValue>> = Vec::with_capacity(table.columns.len());
            for (col_idx, col) in table.columns.iter().enumerate() {
                match value_from_row(row, col_idx, &col.source_type) {
                    Ok(value) => converted.push(Some(value)),
                    Err(message) => match opts.policy {
                        ConversionPolicy::Fail => {
                            return Err(MigrateError::Conversion {
                                table: table.name.clone(),
                                column: col.name.clone(),
                                message,
                            });
                        }
                        ConversionPolicy::Skip => {
                            warn!(
                                "{}.{} at offset {}: {} (column omitted)",
                                table.name,
                                col.name,
                                offset + row_idx as i64,
                                message
                            );
                            counts.conversion_failures.push(ConversionFailure {
                                column: col.name.clone(),
                                row_offset: (offset + row_idx as i64) as u64,
                                message,
                            });
                            converted.push(None);
                        }
                    },
                }
            }
            batch.push(converted);
        }

        let written = with_retry(
            || target.write_batch(table, &opts.target_schema, &batch),
            opts.max_attempts,
            opts.initial_delay,
        )
        .await?;
        counts.rows_written += written;

        offset += page_len as i64;
        let pct = (offset.min(counts.source_rows) * 100) / counts.source_rows;
        info!(
            "{}: {}/{} rows ({}%)",
            table.name,
            offset.min(counts.source_rows),
            counts.source_rows,
            pct
        );
    }

    info!(
        "{}: moved {} rows ({} cells skipped)",
        table.name,
        counts.rows_written,
        counts.conversion_failures.len()
    );

    Ok(counts)
}
