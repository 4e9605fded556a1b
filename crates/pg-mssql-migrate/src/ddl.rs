//! Target-dialect DDL generation.
//!
//! Pure text generation: every statement carries its own existence guard so
//! repeated execution is idempotent. The orchestrator executes the output.

use crate::source::{ColumnDescriptor, TableDescriptor};
use crate::translate::{clean_default_expression, map_type};

/// Quote a SQL Server identifier, escaping closing brackets.
///
/// Identifiers cannot be passed as prepared-statement parameters, so dynamic
/// DDL must quote them: wrap in brackets and double any embedded `]`.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a SQL Server string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Fully qualify a table name.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Generate an existence-guarded `CREATE SCHEMA` statement.
pub fn create_schema(schema: &str) -> String {
    format!(
        "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = {lit})\n\
         EXEC({exec})",
        lit = quote_literal(schema),
        exec = quote_literal(&format!("CREATE SCHEMA {}", quote_ident(schema))),
    )
}

/// Generate an existence-guarded `CREATE TABLE` statement.
///
/// Column order follows `table.columns` exactly; the inline primary key
/// constraint is emitted when the descriptor carries one.
pub fn create_table(table: &TableDescriptor, target_schema: &str) -> String {
    let mut defs: Vec<String> = table.columns.iter().map(column_def).collect();

    if table.has_pk() {
        let pk_cols = table
            .primary_key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        defs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&format!("PK_{}", table.name)),
            pk_cols
        ));
    }

    format!(
        "IF NOT EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = {schema_lit} AND TABLE_NAME = {table_lit})\n\
         BEGIN\n\
         CREATE TABLE {qualified} (\n    {defs}\n)\n\
         END",
        schema_lit = quote_literal(target_schema),
        table_lit = quote_literal(&table.name),
        qualified = qualify_table(target_schema, &table.name),
        defs = defs.join(",\n    "),
    )
}

fn column_def(col: &ColumnDescriptor) -> String {
    let target_type = map_type(
        &col.source_type,
        col.max_length,
        col.numeric_precision,
        col.numeric_scale,
    );

    let mut def = format!("{} {}", quote_ident(&col.name), target_type);

    if col.is_identity {
        def.push_str(" IDENTITY(1,1)");
    }
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    // Identity columns never carry a default; their sequence default was the
    // identity itself.
    if !col.is_identity {
        if let Some(default) = col
            .default_expression
            .as_deref()
            .and_then(clean_default_expression)
        {
            def.push_str(&format!(" DEFAULT {}", default));
        }
    }

    def
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, source_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            source_type: source_type.to_string(),
            nullable: true,
            default_expression: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_identity: false,
            ordinal: 0,
        }
    }

    fn economic_groups() -> TableDescriptor {
        let mut id = col("id", "integer");
        id.nullable = false;
        id.is_identity = true;
        id.default_expression = Some("nextval('economic_groups_id_seq'::regclass)".into());
        let mut name = col("name", "character varying");
        name.max_length = Some(255);
        name.nullable = false;
        TableDescriptor {
            name: "economic_groups".to_string(),
            columns: vec![id, name],
            primary_key: vec!["id".to_string()],
        }
    }

    #[test]
    fn test_create_schema_is_guarded() {
        let sql = create_schema("timesheets");
        assert!(sql.contains("IF NOT EXISTS"));
        assert!(sql.contains("sys.schemas"));
        assert!(sql.contains("CREATE SCHEMA [timesheets]"));
    }

    #[test]
    fn test_create_table_is_guarded() {
        let sql = create_table(&economic_groups(), "dbo");
        assert!(sql.contains("IF NOT EXISTS"));
        assert!(sql.contains("INFORMATION_SCHEMA.TABLES"));
        assert!(sql.contains("TABLE_SCHEMA = 'dbo'"));
        assert!(sql.contains("TABLE_NAME = 'economic_groups'"));
        assert!(sql.contains("CREATE TABLE [dbo].[economic_groups]"));
    }

    #[test]
    fn test_create_table_column_order_and_types() {
        let sql = create_table(&economic_groups(), "dbo");
        let id_pos = sql.find("[id] int IDENTITY(1,1) NOT NULL").unwrap();
        let name_pos = sql.find("[name] nvarchar(255) NOT NULL").unwrap();
        assert!(id_pos < name_pos, "columns must keep descriptor order");
        assert!(sql.contains("CONSTRAINT [PK_economic_groups] PRIMARY KEY ([id])"));
    }

    #[test]
    fn test_sequence_default_never_emitted() {
        let sql = create_table(&economic_groups(), "dbo");
        assert!(!sql.contains("nextval"));
    }

    #[test]
    fn test_safe_default_is_translated() {
        let mut created_at = col("created_at", "timestamp with time zone");
        created_at.default_expression = Some("now()".into());
        let table = TableDescriptor {
            name: "audit".to_string(),
            columns: vec![created_at],
            primary_key: vec![],
        };
        let sql = create_table(&table, "dbo");
        assert!(sql.contains("[created_at] datetimeoffset DEFAULT SYSUTCDATETIME()"));
    }

    #[test]
    fn test_keyless_table_has_no_pk_constraint() {
        let table = TableDescriptor {
            name: "log_lines".to_string(),
            columns: vec![col("message", "text")],
            primary_key: vec![],
        };
        let sql = create_table(&table, "dbo");
        assert!(!sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_ident_quoting() {
        assert_eq!(quote_ident("weird]name"), "[weird]]name]");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }
}
