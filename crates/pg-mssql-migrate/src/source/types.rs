//! Normalized schema descriptors.

use serde::{Deserialize, Serialize};

/// Normalized, engine-agnostic description of a source table.
///
/// Column order is authoritative: generated DDL and insert column lists
/// follow `columns` exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name (unqualified).
    pub name: String,

    /// Column definitions, in catalog ordinal order.
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key column names, in key order. Empty for keyless tables.
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    /// Whether the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// The identity column, if any.
    pub fn identity_column(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_identity)
    }
}

/// Normalized description of one source column. Immutable once introspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Engine-native type name (e.g. "character varying", "timestamptz").
    pub source_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Raw source-dialect default expression, if any.
    pub default_expression: Option<String>,

    /// Maximum length for bounded string types.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub numeric_precision: Option<i32>,

    /// Numeric scale.
    pub numeric_scale: Option<i32>,

    /// Whether the column is identity-like (declared identity or
    /// sequence-backed serial).
    pub is_identity: bool,

    /// Ordinal position (1-based).
    pub ordinal: i32,
}
