use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::{ErrorKind, LdrResult};
use crate::ldr_error;
use crate::source::PartitionId;

/// The type of worker that is currently running.
///
/// A worker type can also have properties that uniquely identify it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerType {
    Writer { partition_id: PartitionId },
    Heartbeat,
    Replanner,
}

/// A trait for types that can be started as workers.
///
/// The generic parameter `H` represents the handle type that will be returned when the worker starts,
/// and `S` represents the state type that can be accessed through the handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type.
    type Error;

    /// Starts the worker and returns a future that resolves to its handle.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// A handle to a running worker that provides access to its state and completion status.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    ///
    /// The state outlives the worker, holding it says nothing about whether the worker is still
    /// running.
    fn state(&self) -> S;

    /// Returns a future that resolves when the worker completes.
    fn wait(self) -> impl Future<Output = LdrResult<()>> + Send;
}

/// Awaits a worker task, reporting a panic or a cancellation as an error of `panic_kind`.
pub(crate) async fn join_worker(
    worker_type: WorkerType,
    handle: Option<JoinHandle<LdrResult<()>>>,
    panic_kind: ErrorKind,
) -> LdrResult<()> {
    let Some(handle) = handle else {
        return Ok(());
    };

    handle.await.map_err(|err| {
        ldr_error!(
            panic_kind,
            "Worker task did not complete",
            format!("{worker_type:?} worker: {err}")
        )
    })?
}
