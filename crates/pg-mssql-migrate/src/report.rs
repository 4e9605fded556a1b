//! Per-table migration state and the final run report.

use crate::translate::convert_datetime_for_target;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of one table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TableState {
    Pending,
    SchemaCreated,
    DataMigrated,
    Verified,
    Failed,
}

/// One cell that could not be converted (skip policy).
#[derive(Debug, Clone, Serialize)]
pub struct ConversionFailure {
    pub column: String,
    pub row_offset: u64,
    pub message: String,
}

/// Outcome of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub name: String,
    pub state: TableState,
    pub source_rows: i64,
    pub rows_written: u64,
    pub target_rows: i64,
    /// Whether the post-move count matched the source count.
    pub consistent: bool,
    pub conversion_failures: Vec<ConversionFailure>,
    pub error: Option<String>,
}

impl TableReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: TableState::Pending,
            source_rows: 0,
            rows_written: 0,
            target_rows: 0,
            consistent: false,
            conversion_failures: Vec::new(),
            error: None,
        }
    }

    pub fn mark_schema_created(&mut self) {
        self.state = TableState::SchemaCreated;
    }

    pub fn mark_data_migrated(&mut self, rows_written: u64) {
        self.state = TableState::DataMigrated;
        self.rows_written = rows_written;
    }

    /// Record the verification counts. Reaches `Verified` even when counts
    /// diverge; the mismatch is reported as a consistency warning, not a
    /// failure.
    pub fn mark_verified(&mut self, source_rows: i64, target_rows: i64) {
        self.state = TableState::Verified;
        self.source_rows = source_rows;
        self.target_rows = target_rows;
        self.consistent = source_rows == target_rows;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = TableState::Failed;
        self.error = Some(error.into());
    }
}

/// Full run report. Always produced, even when every table fails.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            tables: Vec::new(),
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableReport> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Whether any table failed.
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    /// Number of tables that ended in [`TableState::Failed`].
    pub fn failed_count(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.state == TableState::Failed)
            .count()
    }

    /// Render the human-readable end-of-run summary.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Migration summary ===\n");
        out.push_str(&format!("Run: {}\n", self.run_id));
        if let Some(started) = convert_datetime_for_target(Some(self.started_at)) {
            out.push_str(&format!("Started: {}\n", started));
        }
        if let Some(completed) = convert_datetime_for_target(self.completed_at) {
            out.push_str(&format!("Completed: {}\n", completed));
        }

        out.push_str("Tables migrated:\n");
        for table in self
            .tables
            .iter()
            .filter(|t| t.state == TableState::Verified)
        {
            out.push_str(&format!("  {}: {} registros\n", table.name, table.target_rows));
        }

        let warnings: Vec<&TableReport> = self
            .tables
            .iter()
            .filter(|t| t.state == TableState::Verified && !t.consistent)
            .collect();
        if !warnings.is_empty() {
            out.push_str("Consistency warnings:\n");
            for table in warnings {
                out.push_str(&format!(
                    "  {}: source has {} rows, target has {}\n",
                    table.name, table.source_rows, table.target_rows
                ));
            }
        }

        let failed: Vec<&TableReport> = self
            .tables
            .iter()
            .filter(|t| t.state == TableState::Failed)
            .collect();
        if !failed.is_empty() {
            out.push_str("Failed tables:\n");
            for table in failed {
                out.push_str(&format!(
                    "  {}: {}\n",
                    table.name,
                    table.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        let skipped: u64 = self
            .tables
            .iter()
            .map(|t| t.conversion_failures.len() as u64)
            .sum();
        if skipped > 0 {
            out.push_str(&format!("Cells skipped by conversion policy: {}\n", skipped));
        }

        out
    }

    /// Machine-readable form of the report.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut report = TableReport::new("economic_groups");
        assert_eq!(report.state, TableState::Pending);
        report.mark_schema_created();
        assert_eq!(report.state, TableState::SchemaCreated);
        report.mark_data_migrated(2);
        assert_eq!(report.state, TableState::DataMigrated);
        report.mark_verified(2, 2);
        assert_eq!(report.state, TableState::Verified);
        assert!(report.consistent);
    }

    #[test]
    fn test_count_mismatch_is_warning_not_failure() {
        let mut report = TableReport::new("time_entries");
        report.mark_data_migrated(149);
        report.mark_verified(150, 149);
        assert_eq!(report.state, TableState::Verified);
        assert!(!report.consistent);
        assert_eq!(report.target_rows, 149);
    }

    #[test]
    fn test_summary_row_counts() {
        let mut report = MigrationReport::new();
        let mut groups = TableReport::new("economic_groups");
        groups.mark_verified(2, 2);
        report.tables.push(groups);
        report.complete();

        let summary = report.render_summary();
        assert!(summary.contains("economic_groups: 2 registros"));
        assert!(!summary.contains("Consistency warnings"));
        assert!(!summary.contains("Failed tables"));
    }

    #[test]
    fn test_summary_sections() {
        let mut report = MigrationReport::new();

        let mut ok = TableReport::new("economic_groups");
        ok.mark_verified(2, 2);
        report.tables.push(ok);

        let mut drift = TableReport::new("time_entries");
        drift.mark_verified(150, 149);
        report.tables.push(drift);

        let mut broken = TableReport::new("holidays");
        broken.mark_failed("table not found in source schema");
        report.tables.push(broken);

        report.complete();
        let summary = report.render_summary();
        assert!(summary.contains("time_entries: source has 150 rows, target has 149"));
        assert!(summary.contains("holidays: table not found in source schema"));
        assert!(report.has_failures());
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_fully_successful_run_has_no_failures() {
        let mut report = MigrationReport::new();
        let mut ok = TableReport::new("economic_groups");
        ok.mark_verified(2, 2);
        report.tables.push(ok);
        // A count mismatch is a warning, not a failure.
        let mut drift = TableReport::new("time_entries");
        drift.mark_verified(150, 149);
        report.tables.push(drift);

        assert!(!report.has_failures());
        assert_eq!(report.failed_count(), 0);
    }

    #[test]
    fn test_json_serializes() {
        let mut report = MigrationReport::new();
        report.tables.push(TableReport::new("economic_groups"));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"run_id\""));
        assert!(json.contains("\"economic_groups\""));
    }
}
