use std::sync::Arc;

use bytes::Bytes;

use crate::schema::{
    ColumnDescriptor, ColumnType, DEFAULT_FAMILY_ID, RowDecoder, TableDescriptor, encode_key,
    encode_value,
};
use crate::types::{ChangeEvent, Datum, PrevImage, TableId, Timestamp};

pub const USERS_TABLE_ID: TableId = 52;

/// `users (id INT PRIMARY KEY, name STRING, balance INT)` with the origin timestamp column.
pub fn users_table() -> TableDescriptor {
    TableDescriptor::new(USERS_TABLE_ID, "users")
        .with_column(ColumnDescriptor::new("id", ColumnType::Int).not_null())
        .with_column(ColumnDescriptor::new("name", ColumnType::String))
        .with_column(ColumnDescriptor::new("balance", ColumnType::Int))
        .with_primary_key(["id"])
        .with_origin_timestamp_column()
}

/// A decoder for [`users_table`].
///
/// # Panics
///
/// Panics if the users table is not valid for replication.
pub fn users_decoder() -> Arc<RowDecoder> {
    Arc::new(RowDecoder::new([users_table()]).expect("users table is valid for replication"))
}

pub fn user_key(id: i64) -> Bytes {
    encode_key(USERS_TABLE_ID, DEFAULT_FAMILY_ID, &[Datum::Int(id)]).expect("key encodes")
}

pub fn user_row(name: &str, balance: i64) -> Bytes {
    encode_value(&[Datum::String(name.to_owned()), Datum::Int(balance)]).expect("row encodes")
}

/// An upsert of user `id` committed at `wall_time` on the source.
pub fn upsert(id: i64, name: &str, balance: i64, wall_time: i64) -> ChangeEvent {
    ChangeEvent {
        key: user_key(id),
        value: Some(user_row(name, balance)),
        origin_timestamp: None,
        mvcc_timestamp: Timestamp::new(wall_time, 0),
        prev_value: None,
    }
}

/// A deletion of user `id` committed at `wall_time` on the source.
pub fn delete(id: i64, wall_time: i64) -> ChangeEvent {
    ChangeEvent {
        key: user_key(id),
        value: None,
        origin_timestamp: None,
        mvcc_timestamp: Timestamp::new(wall_time, 0),
        prev_value: None,
    }
}

/// Extensions for building change events in tests.
pub trait ChangeEventExt {
    /// Sets the previous image of the row.
    fn with_prev(self, value: Option<Bytes>, wall_time: i64) -> Self;

    /// Marks the source row as itself replicated from a third cluster at `wall_time`.
    fn with_origin(self, wall_time: i64) -> Self;
}

impl ChangeEventExt for ChangeEvent {
    fn with_prev(mut self, value: Option<Bytes>, wall_time: i64) -> Self {
        self.prev_value = Some(PrevImage {
            value,
            mvcc_timestamp: Timestamp::new(wall_time, 0),
        });
        self
    }

    fn with_origin(mut self, wall_time: i64) -> Self {
        self.origin_timestamp = Some(Timestamp::new(wall_time, 0));
        self
    }
}

/// An event whose value cannot be decoded against [`users_table`].
pub fn undecodable(id: i64, wall_time: i64) -> ChangeEvent {
    ChangeEvent {
        value: Some(Bytes::from_static(b"not a row")),
        ..upsert(id, "", 0, wall_time)
    }
}
