use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a replicated table.
pub type TableId = u32;

/// Identifier of a column family within a table.
pub type FamilyId = u32;

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary precision decimal kept in its textual form.
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Bool(value) => write!(f, "{value}"),
            Datum::Int(value) => write!(f, "{value}"),
            Datum::Float(value) => write!(f, "{value}"),
            Datum::Decimal(value) | Datum::String(value) => write!(f, "'{value}'"),
            Datum::Bytes(value) => write!(f, "{} bytes", value.len()),
        }
    }
}

/// A change event decoded against its table descriptor.
///
/// Only built when a human readable form is needed, for dead letter records and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedRow {
    pub table_id: TableId,
    pub family_id: FamilyId,
    /// Primary key columns followed by the family's value columns, in descriptor order.
    pub columns: Vec<(String, Datum)>,
    pub deleted: bool,
}

impl DecodedRow {
    pub fn get(&self, column: &str) -> Option<&Datum> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, datum)| datum)
    }
}
