use tracing::trace;

use crate::error::LdrResult;
use crate::kv::VersionedValue;
use crate::resolver::{ConflictResolver, Decision};
use crate::types::ChangeEvent;

/// Last-writer-wins on replication timestamps.
///
/// A change wins only if its timestamp is strictly greater than the local row's. On a tie the local
/// row is kept, so a row replicated back to its origin is never written again.
#[derive(Debug, Clone, Copy, Default)]
pub struct LwwResolver;

impl LwwResolver {
    pub fn decide(event: &ChangeEvent, existing: &VersionedValue) -> Decision {
        let proposed = event.proposed_timestamp();
        let current = existing.replication_timestamp();

        trace!(%proposed, %current, "resolving with last-writer-wins");

        if proposed > current {
            Decision::AcceptProposed
        } else {
            Decision::IgnoreProposed
        }
    }
}

impl ConflictResolver for LwwResolver {
    async fn resolve(&self, event: &ChangeEvent, existing: &VersionedValue) -> LdrResult<Decision> {
        Ok(Self::decide(event, existing))
    }
}
