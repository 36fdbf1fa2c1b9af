use std::future::Future;

use crate::error::LdrResult;
use crate::types::{BatchStats, ChangeEvent, DecodedRow};

/// Applies batches of change events to the local store.
///
/// A batch is applied atomically: either every event of the batch is applied, or none is and an
/// error is returned.
pub trait BatchHandler {
    fn handle_batch(
        &self,
        events: &[ChangeEvent],
    ) -> impl Future<Output = LdrResult<BatchStats>> + Send;

    /// Decodes `event` for a human readable record, `None` if it cannot be decoded.
    fn decode_row(&self, _event: &ChangeEvent) -> Option<DecodedRow> {
        None
    }
}
