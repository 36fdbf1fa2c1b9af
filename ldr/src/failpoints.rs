//! Failpoints used to inject controlled failures into the ingestion core from tests.

use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, LdrResult};

/// Fires right before a batch transaction commits.
pub const BATCH_HANDLER__BEFORE_COMMIT: &str = "batch_handler.before_commit";
/// Fires when a replication flow starts, before its writers are spawned.
pub const PIPELINE__FLOW_START: &str = "pipeline.flow_start";

/// Executes a configurable failpoint.
///
/// When the failpoint is configured to return, an error is produced whose kind depends on the
/// failpoint parameter:
///
/// - `"no_retry"` - an error that is neither retried in purgatory nor restarts the flow
/// - `"retry"` - an error that is retried in purgatory and restarts the flow
/// - any other value defaults to `"no_retry"`
///
/// Returns `Ok(())` when the failpoint is inactive.
pub fn ldr_fail_point(name: &str) -> LdrResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("retry") => ErrorKind::WithRetry,
            _ => ErrorKind::WithNoRetry,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("the failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
