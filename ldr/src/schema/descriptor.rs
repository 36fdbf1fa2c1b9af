use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, LdrResult};
use crate::types::{Datum, FamilyId, TableId};

/// Hidden column holding the timestamp a row was originally written at on the source cluster.
pub const ORIGIN_TIMESTAMP_COLUMN: &str = "replication_origin_timestamp";

/// Family used when a table does not declare column families explicitly.
pub const DEFAULT_FAMILY_ID: FamilyId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Decimal,
    String,
    Bytes,
}

impl ColumnType {
    /// Returns `true` if a non-null `datum` can be stored in a column of this type.
    pub fn accepts(&self, datum: &Datum) -> bool {
        matches!(
            (self, datum),
            (ColumnType::Bool, Datum::Bool(_))
                | (ColumnType::Int, Datum::Int(_))
                | (ColumnType::Float, Datum::Float(_))
                | (ColumnType::Decimal, Datum::Decimal(_))
                | (ColumnType::String, Datum::String(_))
                | (ColumnType::Bytes, Datum::Bytes(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Hidden columns are excluded from `SELECT *`.
    pub hidden: bool,
}

impl ColumnDescriptor {
    /// Creates a visible, nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            hidden: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    fn is_origin_timestamp(&self) -> bool {
        self.name == ORIGIN_TIMESTAMP_COLUMN
    }
}

/// A group of columns stored together under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamily {
    pub id: FamilyId,
    pub columns: Vec<String>,
}

/// Descriptor of a table that receives replicated rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    /// Explicit column families. When empty, all value columns belong to [`DEFAULT_FAMILY_ID`].
    pub families: Vec<ColumnFamily>,
}

impl TableDescriptor {
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            families: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_family<I, C>(mut self, id: FamilyId, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.families.push(ColumnFamily {
            id,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds the hidden, nullable `DECIMAL` origin timestamp column.
    pub fn with_origin_timestamp_column(self) -> Self {
        self.with_column(ColumnDescriptor::new(ORIGIN_TIMESTAMP_COLUMN, ColumnType::Decimal).hidden())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnDescriptor> {
        self.primary_key
            .iter()
            .filter_map(|name| self.column(name))
            .collect()
    }

    /// Returns the value columns stored in family `family_id`, in declaration order.
    pub fn family_columns(&self, family_id: FamilyId) -> Option<Vec<&ColumnDescriptor>> {
        if self.families.is_empty() {
            if family_id != DEFAULT_FAMILY_ID {
                return None;
            }

            return Some(
                self.columns
                    .iter()
                    .filter(|column| {
                        !column.is_origin_timestamp() && !self.primary_key.contains(&column.name)
                    })
                    .collect(),
            );
        }

        let family = self.families.iter().find(|family| family.id == family_id)?;

        Some(
            family
                .columns
                .iter()
                .filter_map(|name| self.column(name))
                .filter(|column| !column.is_origin_timestamp())
                .collect(),
        )
    }

    /// Checks that the table can be the destination of logical replication.
    ///
    /// The table needs a primary key and a nullable `DECIMAL` origin timestamp column.
    pub fn validate_for_replication(&self) -> LdrResult<()> {
        if self.primary_key.is_empty() {
            bail!(
                ErrorKind::InvalidTableDescriptor,
                "Table has no primary key",
                format!("table {} must have a primary key to be replicated", self.name)
            );
        }

        for name in &self.primary_key {
            if self.column(name).is_none() {
                bail!(
                    ErrorKind::InvalidTableDescriptor,
                    "Primary key references an unknown column",
                    format!("table {} has no column {name}", self.name)
                );
            }
        }

        for family in &self.families {
            if let Some(missing) = family.columns.iter().find(|name| self.column(name).is_none()) {
                bail!(
                    ErrorKind::InvalidTableDescriptor,
                    "Column family references an unknown column",
                    format!(
                        "family {} of table {} has no column {missing}",
                        family.id, self.name
                    )
                );
            }
        }

        let Some(origin) = self.column(ORIGIN_TIMESTAMP_COLUMN) else {
            bail!(
                ErrorKind::InvalidTableDescriptor,
                "Logical replication currently requires a replication_origin_timestamp DECIMAL column",
                format!(
                    "table {name} does not have a {ORIGIN_TIMESTAMP_COLUMN} column, add one with: \
                     ALTER TABLE {name} ADD COLUMN {ORIGIN_TIMESTAMP_COLUMN} DECIMAL NOT VISIBLE DEFAULT NULL ON UPDATE NULL",
                    name = self.name
                )
            );
        };

        if origin.column_type != ColumnType::Decimal {
            bail!(
                ErrorKind::InvalidTableDescriptor,
                "Origin timestamp column has the wrong type",
                format!(
                    "{ORIGIN_TIMESTAMP_COLUMN} column must be type DECIMAL for use by logical replication, table {} declares {:?}",
                    self.name, origin.column_type
                )
            );
        }

        if !origin.nullable {
            bail!(
                ErrorKind::InvalidTableDescriptor,
                "Origin timestamp column is not nullable",
                format!(
                    "{ORIGIN_TIMESTAMP_COLUMN} column must be nullable for use by logical replication, table {}",
                    self.name
                )
            );
        }

        Ok(())
    }
}
