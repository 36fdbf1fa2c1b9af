//! Shared helpers for testing ingestion jobs against in-memory producers and stores.
//!
//! This module provides a scriptable change source, producer and topology, a batch handler whose
//! failures can be controlled, and builders for the tables and events used across tests.

use std::future::Future;
use std::time::Duration;

pub mod control;
pub mod handler;
pub mod pipeline;
pub mod source;
pub mod table;

/// Polls `condition` every few milliseconds until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within `timeout`.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }

        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
