//! SQL Server target: connection pool and transactional batch writes.

use crate::config::TargetConfig;
use crate::ddl::{qualify_table, quote_ident};
use crate::error::{MigrateError, Result};
use crate::source::TableDescriptor;
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Decimal(rust_decimal::Decimal),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
}

/// Type hint for NULL values to ensure correct parameter encoding.
#[derive(Debug, Clone, Copy)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeUtc,
    Date,
    Time,
}

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: TargetConfig,
}

impl TiberiusConnectionManager {
    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        // Encrypted transport is enforced at config-parse time; the pool
        // never opens a plaintext session.
        config.encryption(EncryptionLevel::Required);
        if self.config.trust_server_cert {
            config.trust_cert();
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server target pool.
///
/// An explicit value owned by the orchestrator context (no process-global
/// state); broken connections are recycled by the pool instead of being
/// reused.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlPool {
    /// Create the target pool and verify connectivity.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager {
            config: config.clone(),
        };
        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .connection_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "creating target pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e.to_string(), "connecting to target"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to SQL Server target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting target connection"))
    }

    /// Execute a DDL statement (or any statement without results).
    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let mut client = self.client().await?;
        exec_simple(&mut client, sql).await?;
        debug!("Executed DDL:\n{}", sql);
        Ok(())
    }

    /// Check whether a table exists in the target catalog.
    pub async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let mut client = self.client().await?;

        let mut query = Query::new(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2",
        );
        query.bind(schema);
        query.bind(table);

        let row = query.query(&mut client).await?.into_row().await?;
        Ok(row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0) > 0)
    }

    /// Count the rows of a target table.
    pub async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let mut client = self.client().await?;

        let sql = format!("SELECT COUNT_BIG(*) FROM {}", qualify_table(schema, table));
        let row = client.simple_query(&sql).await?.into_row().await?;
        Ok(row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0))
    }

    /// Write one batch of rows inside a single transaction.
    ///
    /// A cell of `None` means the column is omitted from that row's statement
    /// (conversion-skip policy); `Some(SqlValue::Null(_))` is a SQL NULL.
    /// Any row failure rolls back the whole batch and surfaces as a
    /// [`MigrateError::Batch`]; no partial batch ever commits.
    ///
    /// Tables with a primary key are written with a keyed MERGE so re-runs
    /// cannot duplicate rows; keyless tables fall back to plain INSERT.
    /// Rows carrying an explicit identity value bracket their statement with
    /// `SET IDENTITY_INSERT ON/OFF` inside the same round-trip, so the
    /// session flag can never outlive a statement regardless of how the
    /// batch ends.
    pub async fn write_batch(
        &self,
        table: &TableDescriptor,
        target_schema: &str,
        rows: &[Vec<Option<SqlValue>>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self.client().await?;
        let qualified = qualify_table(target_schema, &table.name);

        exec_simple(&mut client, "BEGIN TRANSACTION").await?;

        let mut written = 0u64;
        for row in rows {
            match write_row(&mut client, table, &qualified, row).await {
                Ok(n) => written += n,
                Err(e) => {
                    let _ =
                        exec_simple(&mut client, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await;
                    return Err(MigrateError::batch(&table.name, e.to_string()));
                }
            }
        }

        if let Err(e) = exec_simple(&mut client, "COMMIT TRANSACTION").await {
            let _ = exec_simple(&mut client, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await;
            return Err(e);
        }

        Ok(written)
    }

    /// Connectivity probe.
    pub async fn health_check(&self) -> Result<()> {
        let mut client = self.client().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    /// Drain and close the pool. Safe to call even if never used.
    pub async fn close(&self) {
        // bb8 drops pooled connections when the pool itself is dropped; this
        // exists so callers have a deterministic teardown point on shutdown.
        debug!("Closing target pool");
    }
}

async fn exec_simple(client: &mut Client<Compat<TcpStream>>, sql: &str) -> Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

async fn write_row(
    client: &mut Client<Compat<TcpStream>>,
    table: &TableDescriptor,
    qualified: &str,
    row: &[Option<SqlValue>],
) -> Result<u64> {
    // Present cells only, in descriptor order.
    let present: Vec<(usize, &SqlValue)> = row
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| cell.as_ref().map(|v| (i, v)))
        .collect();

    if present.is_empty() {
        return Ok(0);
    }

    let cols: Vec<&str> = present
        .iter()
        .map(|(i, _)| table.columns[*i].name.as_str())
        .collect();

    let sql = build_row_sql(table, qualified, &cols);

    let mut query = Query::new(sql);
    for (_, value) in &present {
        bind_value(&mut query, value);
    }

    Ok(query.execute(client).await?.total())
}

/// Build the full statement for one row: keyed MERGE when every key cell is
/// present, INSERT otherwise, with identity toggles folded in when the row
/// carries an explicit identity value.
fn build_row_sql(table: &TableDescriptor, qualified: &str, cols: &[&str]) -> String {
    // MERGE needs every key cell; if a key column was dropped by the
    // conversion policy the row can only be appended.
    let keyed = table.has_pk()
        && table
            .primary_key
            .iter()
            .all(|k| cols.iter().any(|c| c == k));

    let sql = if keyed {
        build_merge(qualified, cols, &table.primary_key)
    } else {
        build_insert(qualified, cols)
    };

    let identity_present = table
        .identity_column()
        .map(|ic| cols.iter().any(|c| *c == ic.name))
        .unwrap_or(false);

    if identity_present {
        wrap_identity_insert(qualified, &sql)
    } else {
        sql
    }
}

/// Bracket a DML statement with `SET IDENTITY_INSERT` toggles in a single
/// batch.
///
/// IDENTITY_INSERT is session-level state that transaction rollback does not
/// revert; keeping ON and OFF in the same round-trip as the DML guarantees a
/// pooled connection is never returned with the flag still set.
fn wrap_identity_insert(qualified: &str, dml: &str) -> String {
    format!(
        "SET IDENTITY_INSERT {q} ON; {dml}; SET IDENTITY_INSERT {q} OFF",
        q = qualified,
        dml = dml.trim_end_matches(';'),
    )
}

/// Build a positional INSERT statement.
fn build_insert(qualified: &str, cols: &[&str]) -> String {
    let col_list = cols
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let params = (1..=cols.len())
        .map(|i| format!("@P{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", qualified, col_list, params)
}

/// Build a keyed MERGE (insert-or-update) statement.
fn build_merge(qualified: &str, cols: &[&str], key_cols: &[String]) -> String {
    let src_select = cols
        .iter()
        .enumerate()
        .map(|(i, c)| format!("@P{} AS {}", i + 1, quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let on_clause = key_cols
        .iter()
        .map(|k| format!("tgt.{k} = src.{k}", k = quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ");

    let update_cols: Vec<&&str> = cols
        .iter()
        .filter(|c| !key_cols.iter().any(|k| k == **c))
        .collect();

    let col_list = cols
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let src_values = cols
        .iter()
        .map(|c| format!("src.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "MERGE {} WITH (HOLDLOCK) AS tgt USING (SELECT {}) AS src ON ({})",
        qualified, src_select, on_clause
    );

    if !update_cols.is_empty() {
        let set_clause = update_cols
            .iter()
            .map(|c| format!("{col} = src.{col}", col = quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", set_clause));
    }

    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
        col_list, src_values
    ));

    sql
}

fn bind_value(query: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Uuid(v) => query.bind(*v),
        // tiberius implements IntoSql for Numeric but not for Decimal; this is
        // the same mantissa/scale conversion as tiberius' ToSql for Decimal.
        SqlValue::Decimal(v) => query.bind(tiberius::numeric::Numeric::new_with_scale(
            v.mantissa(),
            v.scale() as u8,
        )),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeUtc(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::Null(ty) => match ty {
            SqlNullType::Bool => query.bind(Option::<bool>::None),
            SqlNullType::I16 => query.bind(Option::<i16>::None),
            SqlNullType::I32 => query.bind(Option::<i32>::None),
            SqlNullType::I64 => query.bind(Option::<i64>::None),
            SqlNullType::F32 => query.bind(Option::<f32>::None),
            SqlNullType::F64 => query.bind(Option::<f64>::None),
            SqlNullType::String => query.bind(Option::<String>::None),
            SqlNullType::Bytes => query.bind(Option::<Vec<u8>>::None),
            SqlNullType::Uuid => query.bind(Option::<uuid::Uuid>::None),
            SqlNullType::Decimal => query.bind(Option::<tiberius::numeric::Numeric>::None),
            SqlNullType::DateTime => query.bind(Option::<chrono::NaiveDateTime>::None),
            SqlNullType::DateTimeUtc => {
                query.bind(Option::<chrono::DateTime<chrono::Utc>>::None)
            }
            SqlNullType::Date => query.bind(Option::<chrono::NaiveDate>::None),
            SqlNullType::Time => query.bind(Option::<chrono::NaiveTime>::None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ColumnDescriptor;

    fn col(name: &str, is_identity: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            source_type: "integer".to_string(),
            nullable: false,
            default_expression: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_identity,
            ordinal: 0,
        }
    }

    fn identity_table() -> TableDescriptor {
        TableDescriptor {
            name: "economic_groups".to_string(),
            columns: vec![col("id", true), col("name", false)],
            primary_key: vec!["id".to_string()],
        }
    }

    #[test]
    fn test_identity_toggles_stay_in_one_statement() {
        let sql = build_row_sql(&identity_table(), "[dbo].[economic_groups]", &["id", "name"]);
        assert!(sql.starts_with("SET IDENTITY_INSERT [dbo].[economic_groups] ON; "));
        assert!(sql.ends_with("; SET IDENTITY_INSERT [dbo].[economic_groups] OFF"));
        assert!(sql.contains("MERGE [dbo].[economic_groups]"));
        // ON without a matching OFF in the same batch would poison the
        // pooled session for every later identity table.
        assert_eq!(sql.matches("IDENTITY_INSERT").count(), 2);
    }

    #[test]
    fn test_no_identity_toggle_when_identity_cell_omitted() {
        let sql = build_row_sql(&identity_table(), "[dbo].[economic_groups]", &["name"]);
        assert!(!sql.contains("IDENTITY_INSERT"));
        assert!(sql.starts_with("INSERT INTO"));
    }

    #[test]
    fn test_no_identity_toggle_for_plain_table() {
        let table = TableDescriptor {
            name: "holidays".to_string(),
            columns: vec![col("day", false)],
            primary_key: vec![],
        };
        let sql = build_row_sql(&table, "[dbo].[holidays]", &["day"]);
        assert!(!sql.contains("IDENTITY_INSERT"));
    }

    #[test]
    fn test_build_insert() {
        let sql = build_insert("[dbo].[economic_groups]", &["id", "name"]);
        assert_eq!(
            sql,
            "INSERT INTO [dbo].[economic_groups] ([id], [name]) VALUES (@P1, @P2)"
        );
    }

    #[test]
    fn test_build_merge_keyed() {
        let sql = build_merge(
            "[dbo].[economic_groups]",
            &["id", "name"],
            &["id".to_string()],
        );
        assert!(sql.starts_with("MERGE [dbo].[economic_groups] WITH (HOLDLOCK) AS tgt"));
        assert!(sql.contains("USING (SELECT @P1 AS [id], @P2 AS [name]) AS src"));
        assert!(sql.contains("ON (tgt.[id] = src.[id])"));
        assert!(sql.contains("WHEN MATCHED THEN UPDATE SET [name] = src.[name]"));
        assert!(sql.contains(
            "WHEN NOT MATCHED THEN INSERT ([id], [name]) VALUES (src.[id], src.[name]);"
        ));
    }

    #[test]
    fn test_build_merge_all_key_columns_skips_update() {
        let sql = build_merge(
            "[dbo].[links]",
            &["a", "b"],
            &["a".to_string(), "b".to_string()],
        );
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.contains("WHEN NOT MATCHED THEN INSERT"));
    }
}
