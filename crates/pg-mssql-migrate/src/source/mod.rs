//! PostgreSQL source: catalog introspection and paginated row reads.
//!
//! The source is used strictly read-only: information_schema queries plus
//! ordered row scans.

mod types;

pub use types::*;

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::translate::normalize_string;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use std::collections::{BTreeMap, BTreeSet};
use tokio_postgres::{Config as PgConfig, NoTls, Row};
use tracing::{debug, info, warn};

/// PostgreSQL source pool.
pub struct PgSource {
    pool: Pool,
    schema: String,
}

impl PgSource {
    /// Connect to the source database and verify the connection.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(4)
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating source pool"))?;

        // Smoke test before reporting success.
        {
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e.to_string(), "connecting to source"))?;
            client.simple_query("SELECT 1").await?;
        }

        info!(
            "Connected to PostgreSQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// The configured source schema.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting source connection"))
    }

    /// List base tables of the source schema in foreign-key dependency order
    /// (referenced tables before referencing tables).
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;

        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[&self.schema],
            )
            .await
            .map_err(|e| MigrateError::Catalog(format!("listing tables: {}", e)))?;

        let tables: Vec<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        // Foreign-key edges: (referenced, referencing).
        let rows = client
            .query(
                "SELECT ccu.table_name AS referenced, tc.table_name AS referencing \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.constraint_schema = tc.constraint_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema = $1",
                &[&self.schema],
            )
            .await
            .map_err(|e| MigrateError::Catalog(format!("listing foreign keys: {}", e)))?;

        let edges: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect();

        let ordered = topo_sort(&tables, &edges);
        info!(
            "Found {} tables in schema '{}' (dependency-ordered)",
            ordered.len(),
            self.schema
        );
        Ok(ordered)
    }

    /// Read one table's column and key metadata from the catalog.
    pub async fn describe_table(&self, table: &str) -> Result<TableDescriptor> {
        let client = self.client().await?;

        let rows = client
            .query(
                "SELECT column_name, data_type, is_nullable, column_default, \
                        character_maximum_length, numeric_precision, numeric_scale, \
                        is_identity, ordinal_position \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&self.schema, &table],
            )
            .await
            .map_err(|e| MigrateError::Catalog(format!("describing {}: {}", table, e)))?;

        if rows.is_empty() {
            return Err(MigrateError::Catalog(format!(
                "table '{}.{}' not found in source catalog",
                self.schema, table
            )));
        }

        let columns: Vec<ColumnDescriptor> = rows.iter().map(column_from_catalog_row).collect();

        let pk_rows = client
            .query(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON kcu.constraint_name = tc.constraint_name \
                  AND kcu.constraint_schema = tc.constraint_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema = $1 AND tc.table_name = $2 \
                 ORDER BY kcu.ordinal_position",
                &[&self.schema, &table],
            )
            .await
            .map_err(|e| MigrateError::Catalog(format!("reading primary key of {}: {}", table, e)))?;

        let primary_key: Vec<String> = pk_rows.iter().map(|r| r.get::<_, String>(0)).collect();

        debug!(
            "Described {}: {} columns, pk {:?}",
            table,
            columns.len(),
            primary_key
        );

        Ok(TableDescriptor {
            name: table.to_string(),
            columns,
            primary_key,
        })
    }

    /// Count the rows of a table.
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            qualify_pg_table(&self.schema, table)
        );
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    /// Fetch one page of rows in stable order.
    ///
    /// Pagination orders by the primary key (or the first column for keyless
    /// tables) so page boundaries are stable across re-runs.
    pub async fn fetch_page(
        &self,
        table: &TableDescriptor,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Row>> {
        let client = self.client().await?;

        let col_list = table
            .columns
            .iter()
            .map(|c| quote_pg_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let order_cols: Vec<&str> = if table.has_pk() {
            table.primary_key.iter().map(String::as_str).collect()
        } else {
            vec![table.columns[0].name.as_str()]
        };
        let order_by = order_cols
            .iter()
            .map(|c| quote_pg_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
            col_list,
            qualify_pg_table(&self.schema, &table.name),
            order_by,
            limit,
            offset
        );

        Ok(client.query(&sql, &[]).await?)
    }

    /// Connectivity probe.
    pub async fn health_check(&self) -> Result<()> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Drain and close the pool. Safe to call more than once.
    pub async fn close(&self) {
        self.pool.close();
    }
}

fn column_from_catalog_row(row: &Row) -> ColumnDescriptor {
    let default_expression = normalize_string(
        row.get::<_, Option<String>>(3).as_deref(),
    );
    let declared_identity = row.get::<_, String>(7) == "YES";
    // Sequence-backed serial columns behave as identity even though the
    // catalog reports them as plain columns with a nextval default.
    let serial = default_expression
        .as_deref()
        .map(|d| d.contains("nextval("))
        .unwrap_or(false);

    ColumnDescriptor {
        name: row.get(0),
        source_type: row.get(1),
        nullable: row.get::<_, String>(2) == "YES",
        default_expression,
        max_length: row.get(4),
        numeric_precision: row.get(5),
        numeric_scale: row.get(6),
        is_identity: declared_identity || serial,
        ordinal: row.get(8),
    }
}

/// Quote a PostgreSQL identifier.
fn quote_pg_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a PostgreSQL table name with schema and proper quoting.
fn qualify_pg_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_pg_ident(schema), quote_pg_ident(table))
}

/// Topologically sort tables so referenced tables come before referencing
/// ones. Ties break alphabetically for a deterministic plan; on a dependency
/// cycle the remainder is appended in name order with a warning.
pub fn topo_sort(tables: &[String], edges: &[(String, String)]) -> Vec<String> {
    let known: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    let mut children: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = tables.iter().map(|t| (t.as_str(), 0)).collect();

    for (referenced, referencing) in edges {
        // Self-references and edges into other schemas don't affect creation
        // order.
        if referenced == referencing
            || !known.contains(referenced.as_str())
            || !known.contains(referencing.as_str())
        {
            continue;
        }
        if children
            .entry(referenced.as_str())
            .or_default()
            .insert(referencing.as_str())
        {
            *indegree.get_mut(referencing.as_str()).expect("known table") += 1;
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&t, _)| t)
        .collect();
    let mut ordered = Vec::with_capacity(tables.len());

    while let Some(&next) = ready.iter().next() {
        ready.remove(next);
        ordered.push(next.to_string());

        if let Some(deps) = children.get(next) {
            for &child in deps {
                let d = indegree.get_mut(child).expect("known table");
                *d -= 1;
                if *d == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if ordered.len() < tables.len() {
        let leftover: Vec<String> = {
            let placed: BTreeSet<&str> = ordered.iter().map(String::as_str).collect();
            let mut leftover: Vec<&str> = known.difference(&placed).copied().collect();
            leftover.sort_unstable();
            warn!(
                "Foreign-key cycle detected among {:?}; appending in name order",
                leftover
            );
            leftover.into_iter().map(String::from).collect()
        };
        ordered.extend(leftover);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn edges(v: &[(&str, &str)]) -> Vec<(String, String)> {
        v.iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_topo_sort_referenced_first() {
        // time_entries -> campaigns -> clients; users independent.
        let tables = names(&["campaigns", "clients", "time_entries", "users"]);
        let deps = edges(&[
            ("clients", "campaigns"),
            ("campaigns", "time_entries"),
            ("users", "time_entries"),
        ]);

        let ordered = topo_sort(&tables, &deps);
        let pos = |t: &str| ordered.iter().position(|x| x == t).unwrap();
        assert!(pos("clients") < pos("campaigns"));
        assert!(pos("campaigns") < pos("time_entries"));
        assert!(pos("users") < pos("time_entries"));
        assert_eq!(ordered.len(), 4);
    }

    #[test]
    fn test_topo_sort_no_edges_is_alphabetical() {
        let tables = names(&["zeta", "alpha", "mid"]);
        assert_eq!(topo_sort(&tables, &[]), names(&["alpha", "mid", "zeta"]));
    }

    #[test]
    fn test_topo_sort_ignores_self_reference() {
        let tables = names(&["employees"]);
        let deps = edges(&[("employees", "employees")]);
        assert_eq!(topo_sort(&tables, &deps), names(&["employees"]));
    }

    #[test]
    fn test_topo_sort_cycle_appends_remainder() {
        let tables = names(&["a", "b", "standalone"]);
        let deps = edges(&[("a", "b"), ("b", "a")]);
        let ordered = topo_sort(&tables, &deps);
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0], "standalone");
        // Cycle members still present, deterministic order.
        assert_eq!(&ordered[1..], &names(&["a", "b"])[..]);
    }

    #[test]
    fn test_topo_sort_ignores_foreign_schema_edges() {
        let tables = names(&["orders"]);
        let deps = edges(&[("other_schema_table", "orders")]);
        assert_eq!(topo_sort(&tables, &deps), names(&["orders"]));
    }
}
