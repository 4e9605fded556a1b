//! Type and value translation between PostgreSQL and SQL Server.
//!
//! Everything here is pure: lookup plus parameterization, no I/O. Value
//! converters are total over missing input (`None` in, `None` out) and
//! never panic.

use crate::target::{SqlNullType, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::Row;

/// Dialect ceiling for bounded national-character columns; longer columns
/// map to `nvarchar(max)`.
pub const MAX_BOUNDED_STRING_LEN: i32 = 4000;

/// Map a PostgreSQL data type to its SQL Server equivalent.
pub fn map_type(
    source_type: &str,
    max_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    match source_type.to_lowercase().as_str() {
        // Boolean
        "boolean" | "bool" => "bit".to_string(),

        // Integer types
        "smallint" | "int2" | "smallserial" => "smallint".to_string(),
        "integer" | "int" | "int4" | "serial" => "int".to_string(),
        "bigint" | "int8" | "bigserial" => "bigint".to_string(),

        // Decimal/numeric
        "numeric" | "decimal" => match (precision, scale) {
            (Some(p), Some(s)) if p > 0 => format!("decimal({},{})", p.min(38), s),
            (Some(p), None) if p > 0 => format!("decimal({},0)", p.min(38)),
            _ => "decimal(38,10)".to_string(),
        },
        "money" => "decimal(19,4)".to_string(),

        // Floating point
        "real" | "float4" => "real".to_string(),
        "double precision" | "float8" => "float".to_string(),

        // String types
        "character varying" | "varchar" => match max_length {
            Some(n) if n > 0 && n <= MAX_BOUNDED_STRING_LEN => format!("nvarchar({})", n),
            _ => "nvarchar(max)".to_string(),
        },
        "character" | "char" | "bpchar" => match max_length {
            Some(n) if n > 0 && n <= MAX_BOUNDED_STRING_LEN => format!("nchar({})", n),
            _ => "nvarchar(max)".to_string(),
        },
        "text" | "citext" | "name" => "nvarchar(max)".to_string(),

        // Binary
        "bytea" => "varbinary(max)".to_string(),

        // Date/time types
        "date" => "date".to_string(),
        "time" | "time without time zone" => "time".to_string(),
        "timestamp" | "timestamp without time zone" => "datetime2".to_string(),
        "timestamptz" | "timestamp with time zone" => "datetimeoffset".to_string(),

        // GUID
        "uuid" => "uniqueidentifier".to_string(),

        // Structured types carried as text
        "json" | "jsonb" => "nvarchar(max)".to_string(),
        "xml" => "xml".to_string(),

        // Network types
        "inet" | "cidr" | "macaddr" => "varchar(45)".to_string(),

        // Default fallback
        _ => "nvarchar(max)".to_string(),
    }
}

/// Translate a PostgreSQL column default expression for SQL Server.
///
/// Recognizes a fixed substitution table of safe equivalents. Anything
/// matching a known-problematic pattern (sequence-generator calls,
/// timezone-qualified expressions, cast suffixes, quoted strings with
/// casts) is discarded entirely: the target column simply gets no default.
pub fn clean_default_expression(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    // Sequence generators are handled by IDENTITY, never by defaults.
    if lower.contains("nextval(") {
        return None;
    }
    // Timezone-qualified expressions and cast suffixes have no safe
    // one-to-one translation.
    if lower.contains("timezone(") || lower.contains("::") {
        return None;
    }

    // Safe substitutions.
    match lower.as_str() {
        "now()" | "current_timestamp" | "current_timestamp()" | "transaction_timestamp()"
        | "statement_timestamp()" | "clock_timestamp()" => {
            return Some("SYSUTCDATETIME()".to_string())
        }
        "current_date" => return Some("CAST(SYSUTCDATETIME() AS date)".to_string()),
        "gen_random_uuid()" | "uuid_generate_v4()" => return Some("NEWID()".to_string()),
        _ => {}
    }

    if let Ok(flag) = lower.parse::<bool>() {
        return convert_boolean(Some(flag)).map(|b| b.to_string());
    }

    // Bare numeric literals pass through unchanged.
    if trimmed.parse::<f64>().is_ok() {
        return Some(trimmed.to_string());
    }

    // Quoted strings and everything else: discard rather than guess.
    None
}

/// Convert a boolean to the target bit representation (`1`/`0`).
pub fn convert_boolean(value: Option<bool>) -> Option<u8> {
    value.map(|b| if b { 1 } else { 0 })
}

/// Render a UTC timestamp as an ISO-8601 string with millisecond precision,
/// e.g. `2025-01-02T10:30:00.000Z`.
pub fn convert_datetime_for_target(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// Trim a string, mapping empty (or missing) input to `None`.
pub fn normalize_string(value: Option<&str>) -> Option<String> {
    match value {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => None,
    }
}

/// Extract one cell from a source row as a typed [`SqlValue`], based on the
/// column's source type.
///
/// Returns `Err` with a human-readable message when the driver cannot decode
/// the cell as the expected type; the caller decides (per policy) whether to
/// omit the column or abort the table.
pub fn value_from_row(
    row: &Row,
    idx: usize,
    source_type: &str,
) -> std::result::Result<SqlValue, String> {
    let ty = source_type.to_lowercase();

    macro_rules! get {
        ($rust_ty:ty, $variant:ident, $null:ident) => {
            row.try_get::<_, Option<$rust_ty>>(idx)
                .map(|v| match v {
                    Some(v) => SqlValue::$variant(v),
                    None => SqlValue::Null(SqlNullType::$null),
                })
                .map_err(|e| e.to_string())
        };
    }

    match ty.as_str() {
        "boolean" | "bool" => get!(bool, Bool, Bool),
        "smallint" | "int2" => get!(i16, I16, I16),
        "integer" | "int" | "int4" => get!(i32, I32, I32),
        "bigint" | "int8" => get!(i64, I64, I64),
        "real" | "float4" => get!(f32, F32, F32),
        "double precision" | "float8" => get!(f64, F64, F64),
        "numeric" | "decimal" => get!(rust_decimal::Decimal, Decimal, Decimal),
        "character varying" | "varchar" | "text" | "citext" | "name" => {
            get!(String, String, String)
        }
        // Fixed-width char: strip the blank padding the source engine stores.
        "character" | "char" | "bpchar" => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| match v {
                Some(s) => SqlValue::String(s.trim_end().to_string()),
                None => SqlValue::Null(SqlNullType::String),
            })
            .map_err(|e| e.to_string()),
        "bytea" => get!(Vec<u8>, Bytes, Bytes),
        "uuid" => get!(uuid::Uuid, Uuid, Uuid),
        "date" => get!(NaiveDate, Date, Date),
        "time" | "time without time zone" => get!(NaiveTime, Time, Time),
        "timestamp" | "timestamp without time zone" => get!(NaiveDateTime, DateTime, DateTime),
        "timestamptz" | "timestamp with time zone" => get!(DateTime<Utc>, DateTimeUtc, DateTimeUtc),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| match v {
                Some(v) => SqlValue::String(v.to_string()),
                None => SqlValue::Null(SqlNullType::String),
            })
            .map_err(|e| e.to_string()),
        // Unknown types: fall back to text decoding.
        _ => get!(String, String, String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_integer_types() {
        assert_eq!(map_type("integer", None, None, None), "int");
        assert_eq!(map_type("bigint", None, None, None), "bigint");
        assert_eq!(map_type("smallint", None, None, None), "smallint");
        assert_eq!(map_type("serial", None, None, None), "int");
    }

    #[test]
    fn test_string_types() {
        assert_eq!(
            map_type("character varying", Some(100), None, None),
            "nvarchar(100)"
        );
        assert_eq!(
            map_type("character varying", Some(4000), None, None),
            "nvarchar(4000)"
        );
        assert_eq!(
            map_type("character varying", Some(4001), None, None),
            "nvarchar(max)"
        );
        assert_eq!(
            map_type("character varying", None, None, None),
            "nvarchar(max)"
        );
        assert_eq!(map_type("text", None, None, None), "nvarchar(max)");
        assert_eq!(map_type("character", Some(2), None, None), "nchar(2)");
    }

    #[test]
    fn test_decimal_types() {
        assert_eq!(map_type("numeric", Some(0), Some(18), Some(2)), "decimal(18,2)");
        assert_eq!(map_type("numeric", None, None, None), "decimal(38,10)");
        assert_eq!(map_type("money", None, None, None), "decimal(19,4)");
    }

    #[test]
    fn test_datetime_types() {
        assert_eq!(map_type("timestamp without time zone", None, None, None), "datetime2");
        assert_eq!(map_type("timestamp with time zone", None, None, None), "datetimeoffset");
        assert_eq!(map_type("date", None, None, None), "date");
        assert_eq!(map_type("time without time zone", None, None, None), "time");
    }

    #[test]
    fn test_special_types() {
        assert_eq!(map_type("uuid", None, None, None), "uniqueidentifier");
        assert_eq!(map_type("boolean", None, None, None), "bit");
        assert_eq!(map_type("bytea", None, None, None), "varbinary(max)");
        assert_eq!(map_type("jsonb", None, None, None), "nvarchar(max)");
    }

    #[test]
    fn test_mapping_totality_over_fixture_types() {
        // Every type present in the timesheet fixture schemas must map to a
        // non-empty target spec.
        let fixture_types = [
            "integer", "bigint", "smallint", "boolean", "character varying",
            "character", "text", "numeric", "real", "double precision",
            "date", "time without time zone", "timestamp without time zone",
            "timestamp with time zone", "uuid", "bytea", "json", "jsonb",
            "inet", "some_custom_enum",
        ];
        for ty in fixture_types {
            let spec = map_type(ty, Some(50), Some(10), Some(2));
            assert!(!spec.is_empty(), "no mapping for {}", ty);
        }
    }

    #[test]
    fn test_default_safe_substitutions() {
        assert_eq!(
            clean_default_expression("now()").as_deref(),
            Some("SYSUTCDATETIME()")
        );
        assert_eq!(
            clean_default_expression("CURRENT_TIMESTAMP").as_deref(),
            Some("SYSUTCDATETIME()")
        );
        assert_eq!(
            clean_default_expression("gen_random_uuid()").as_deref(),
            Some("NEWID()")
        );
        assert_eq!(clean_default_expression("true").as_deref(), Some("1"));
        assert_eq!(clean_default_expression("false").as_deref(), Some("0"));
        assert_eq!(clean_default_expression("0").as_deref(), Some("0"));
        assert_eq!(clean_default_expression("42.5").as_deref(), Some("42.5"));
    }

    #[test]
    fn test_default_problematic_expressions_discarded() {
        let problematic = [
            "nextval('economic_groups_id_seq'::regclass)",
            "timezone('utc'::text, now())",
            "'active'::character varying",
            "'{}'::jsonb",
            "now()::date",
            "('x' || 'y')",
            "",
        ];
        for expr in problematic {
            assert_eq!(
                clean_default_expression(expr),
                None,
                "expected {:?} to be discarded",
                expr
            );
        }
    }

    #[test]
    fn test_convert_boolean() {
        assert_eq!(convert_boolean(Some(true)), Some(1));
        assert_eq!(convert_boolean(Some(false)), Some(0));
        assert_eq!(convert_boolean(None), None);
    }

    #[test]
    fn test_convert_datetime_for_target() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 2, 10, 30, 0).unwrap();
        assert_eq!(
            convert_datetime_for_target(Some(dt)).as_deref(),
            Some("2025-01-02T10:30:00.000Z")
        );
        assert_eq!(convert_datetime_for_target(None), None);
    }

    #[test]
    fn test_normalize_string() {
        assert_eq!(normalize_string(Some("  hello  ")).as_deref(), Some("hello"));
        assert_eq!(normalize_string(Some("   ")), None);
        assert_eq!(normalize_string(Some("")), None);
        assert_eq!(normalize_string(None), None);
    }
}
