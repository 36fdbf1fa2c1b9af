use std::fmt;
use std::str::FromStr;

use ldr_config::shared::CursorConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, LdrError};
use crate::ldr_error;

/// Number of digits used to render the logical component as a decimal fraction.
const LOGICAL_DIGITS: usize = 10;

/// A hybrid-logical clock timestamp.
///
/// Timestamps are totally ordered by wall time, then by logical counter. They are rendered as a
/// decimal `wall_time.logical` with the logical counter zero padded, which is the representation
/// stored in the replication origin column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub wall_time: i64,
    pub logical: i32,
}

impl Timestamp {
    pub const MIN: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    pub fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::MIN
    }

    /// Returns the smallest timestamp strictly greater than `self`.
    pub fn next(&self) -> Self {
        match self.logical.checked_add(1) {
            Some(logical) => Self::new(self.wall_time, logical),
            None => Self::new(self.wall_time.saturating_add(1), 0),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.wall_time,
            self.logical,
            width = LOGICAL_DIGITS
        )
    }
}

impl FromStr for Timestamp {
    type Err = LdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ldr_error!(
                ErrorKind::InvalidData,
                "Invalid decimal timestamp",
                format!("'{s}' is not of the form <wall_time>[.<logical>]")
            )
        };

        let (wall, logical) = match s.split_once('.') {
            Some((wall, logical)) => (wall, logical),
            None => (s, "0"),
        };

        let wall_time = wall.parse::<i64>().map_err(|_| invalid())?;
        let logical = logical.parse::<i32>().map_err(|_| invalid())?;
        if logical < 0 {
            return Err(invalid());
        }

        Ok(Self::new(wall_time, logical))
    }
}

impl From<CursorConfig> for Timestamp {
    fn from(cursor: CursorConfig) -> Self {
        Self::new(cursor.wall_time, cursor.logical)
    }
}
