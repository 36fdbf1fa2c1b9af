use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::bail;
use crate::error::{ErrorKind, LdrResult};
use crate::ldr_error;
use crate::schema::{ColumnDescriptor, TableDescriptor};
use crate::types::{ChangeEvent, Datum, DecodedRow, FamilyId, TableId};

/// Length of the table and family prefix of every encoded key.
const KEY_PREFIX_LEN: usize = 8;

/// Encodes the key of a row in a given column family.
///
/// The key is the big-endian table id and family id followed by the JSON encoded primary key.
pub fn encode_key(table_id: TableId, family_id: FamilyId, primary_key: &[Datum]) -> LdrResult<Bytes> {
    let encoded_pk = serde_json::to_vec(primary_key)?;

    let mut key = BytesMut::with_capacity(KEY_PREFIX_LEN + encoded_pk.len());
    key.put_u32(table_id);
    key.put_u32(family_id);
    key.put_slice(&encoded_pk);

    Ok(key.freeze())
}

/// Encodes the value columns of one column family.
pub fn encode_value(columns: &[Datum]) -> LdrResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(columns)?))
}

/// Splits an encoded key into its table id, family id and encoded primary key.
pub fn decode_key_prefix(key: &[u8]) -> LdrResult<(TableId, FamilyId, &[u8])> {
    if key.len() < KEY_PREFIX_LEN {
        bail!(
            ErrorKind::SchemaMismatch,
            "Key is too short to be decoded",
            format!("expected at least {KEY_PREFIX_LEN} bytes, got {}", key.len())
        );
    }

    let (prefix, pk) = key.split_at(KEY_PREFIX_LEN);
    let table_id = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let family_id = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

    Ok((table_id, family_id, pk))
}

/// Decodes change events against the descriptors of the replicated tables.
///
/// Any disagreement between an event and its descriptor is reported as
/// [`ErrorKind::SchemaMismatch`], which is never retried.
#[derive(Debug, Clone, Default)]
pub struct RowDecoder {
    tables: HashMap<TableId, TableDescriptor>,
}

impl RowDecoder {
    /// Builds a decoder, validating every table for replication.
    pub fn new<I>(tables: I) -> LdrResult<Self>
    where
        I: IntoIterator<Item = TableDescriptor>,
    {
        let mut decoded_tables = HashMap::new();
        for table in tables {
            table.validate_for_replication()?;
            if decoded_tables.insert(table.id, table).is_some() {
                bail!(
                    ErrorKind::InvalidTableDescriptor,
                    "Duplicate table descriptor"
                );
            }
        }

        Ok(Self {
            tables: decoded_tables,
        })
    }

    pub fn table(&self, table_id: TableId) -> Option<&TableDescriptor> {
        self.tables.get(&table_id)
    }

    pub fn decode(&self, event: &ChangeEvent) -> LdrResult<DecodedRow> {
        self.decode_parts(&event.key, event.value.as_deref())
    }

    /// Decodes a key and an optional encoded value, `None` meaning a deleted row.
    pub fn decode_parts(&self, key: &[u8], value: Option<&[u8]>) -> LdrResult<DecodedRow> {
        let (table_id, family_id, encoded_pk) = decode_key_prefix(key)?;

        let table = self.tables.get(&table_id).ok_or_else(|| {
            ldr_error!(
                ErrorKind::SchemaMismatch,
                "Event references an unknown table",
                format!("table {table_id} is not replicated by this job")
            )
        })?;

        let family_columns = table.family_columns(family_id).ok_or_else(|| {
            ldr_error!(
                ErrorKind::SchemaMismatch,
                "Event references an unknown column family",
                format!("table {} has no family {family_id}", table.name)
            )
        })?;

        let pk_datums: Vec<Datum> = parse_datums(encoded_pk, "primary key")?;
        let pk_columns = table.primary_key_columns();
        let mut columns = check_columns(table, &pk_columns, pk_datums, "primary key")?;

        if let Some(value) = value {
            let datums: Vec<Datum> = parse_datums(value, "row value")?;
            columns.extend(check_columns(table, &family_columns, datums, "row value")?);
        }

        Ok(DecodedRow {
            table_id,
            family_id,
            columns,
            deleted: value.is_none(),
        })
    }
}

fn parse_datums(bytes: &[u8], part: &'static str) -> LdrResult<Vec<Datum>> {
    serde_json::from_slice(bytes).map_err(|err| {
        ldr_error!(
            ErrorKind::SchemaMismatch,
            "Undecodable row",
            format!("failed to decode the {part}: {err}")
        )
    })
}

fn check_columns(
    table: &TableDescriptor,
    descriptors: &[&ColumnDescriptor],
    datums: Vec<Datum>,
    part: &'static str,
) -> LdrResult<Vec<(String, Datum)>> {
    if descriptors.len() != datums.len() {
        bail!(
            ErrorKind::SchemaMismatch,
            "Column count mismatch",
            format!(
                "table {} expects {} columns in the {part}, the event has {}",
                table.name,
                descriptors.len(),
                datums.len()
            )
        );
    }

    descriptors
        .iter()
        .zip(datums)
        .map(|(descriptor, datum)| {
            let valid = if datum.is_null() {
                descriptor.nullable
            } else {
                descriptor.column_type.accepts(&datum)
            };

            if !valid {
                bail!(
                    ErrorKind::SchemaMismatch,
                    "Column type mismatch",
                    format!(
                        "column {}.{} of type {:?} cannot hold {datum}",
                        table.name, descriptor.name, descriptor.column_type
                    )
                );
            }

            Ok((descriptor.name.clone(), datum))
        })
        .collect()
}
