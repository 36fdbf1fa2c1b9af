use serde::{Deserialize, Serialize};

/// Batching of change events pulled from the source before they are applied.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of events applied in one transaction.
    pub max_size: usize,
    /// Maximum time, in milliseconds, to wait for a batch to fill before applying it.
    pub max_fill_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_fill_ms: 1000,
        }
    }
}
