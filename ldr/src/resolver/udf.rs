use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{ErrorKind, LdrResult};
use crate::kv::VersionedValue;
use crate::ldr_error;
use crate::resolver::{ConflictResolver, Decision};
use crate::types::{ChangeEvent, Timestamp};

/// The kind of change submitted to a conflict function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Upsert,
    Delete,
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictAction::Upsert => f.write_str("upsert"),
            ConflictAction::Delete => f.write_str("delete"),
        }
    }
}

/// Arguments passed to a conflict function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictFunctionArgs {
    pub action: ConflictAction,
    /// The replicated row, `None` for a deletion.
    pub proposed: Option<Bytes>,
    /// The local row, `None` if it is a tombstone.
    pub existing: Option<Bytes>,
    /// The source row before the change, when the source supplied it.
    pub previous: Option<Bytes>,
    pub existing_mvcc_timestamp: Timestamp,
    pub existing_origin_timestamp: Option<Timestamp>,
    pub proposed_mvcc_timestamp: Timestamp,
    pub proposed_previous_mvcc_timestamp: Option<Timestamp>,
}

impl ConflictFunctionArgs {
    pub fn new(event: &ChangeEvent, existing: &VersionedValue) -> Self {
        let action = if event.is_delete() {
            ConflictAction::Delete
        } else {
            ConflictAction::Upsert
        };

        Self {
            action,
            proposed: event.value.clone(),
            existing: existing.value.row.clone(),
            previous: event
                .prev_value
                .as_ref()
                .and_then(|prev| prev.value.clone()),
            existing_mvcc_timestamp: existing.mvcc_timestamp,
            existing_origin_timestamp: existing.value.origin_timestamp,
            proposed_mvcc_timestamp: event.mvcc_timestamp,
            proposed_previous_mvcc_timestamp: event
                .prev_value
                .as_ref()
                .map(|prev| prev.mvcc_timestamp),
        }
    }
}

/// A user supplied conflict resolution function.
///
/// Returns either `accept_proposed` or `ignore_proposed`.
#[async_trait]
pub trait ConflictFunction: Send + Sync + fmt::Debug {
    async fn call(&self, args: ConflictFunctionArgs) -> LdrResult<String>;
}

/// Conflict functions available to jobs, by name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ConflictFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: ConflictFunction + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConflictFunction>> {
        self.functions.get(name).cloned()
    }
}

/// Resolves conflicts by calling a registered [`ConflictFunction`].
///
/// Any failure of the function, including an unknown decision, is reported as
/// [`ErrorKind::ConflictFunctionFailed`] so the event is retried later.
#[derive(Debug, Clone)]
pub struct UdfResolver {
    name: String,
    function: Arc<dyn ConflictFunction>,
}

impl UdfResolver {
    pub fn new(name: String, function: Arc<dyn ConflictFunction>) -> Self {
        Self { name, function }
    }
}

impl ConflictResolver for UdfResolver {
    async fn resolve(&self, event: &ChangeEvent, existing: &VersionedValue) -> LdrResult<Decision> {
        let args = ConflictFunctionArgs::new(event, existing);
        let action = args.action;

        let output = self.function.call(args).await.map_err(|err| {
            ldr_error!(
                ErrorKind::ConflictFunctionFailed,
                "Conflict function invocation failed",
                format!("function '{}' failed: {err}", self.name)
            )
        })?;

        let decision = output.parse::<Decision>()?;
        debug!(function = %self.name, %action, %decision, "conflict function resolved a change");

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;
    use crate::kv::KvValue;
    use crate::types::PrevImage;

    #[derive(Debug)]
    struct Fixed(&'static str);

    #[async_trait]
    impl ConflictFunction for Fixed {
        async fn call(&self, _args: ConflictFunctionArgs) -> LdrResult<String> {
            Ok(self.0.to_owned())
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl ConflictFunction for Failing {
        async fn call(&self, _args: ConflictFunctionArgs) -> LdrResult<String> {
            bail!(ErrorKind::Unknown, "division by zero");
        }
    }

    /// Keeps the row with the larger payload.
    #[derive(Debug)]
    struct Longest;

    #[async_trait]
    impl ConflictFunction for Longest {
        async fn call(&self, args: ConflictFunctionArgs) -> LdrResult<String> {
            let proposed = args.proposed.map_or(0, |row| row.len());
            let existing = args.existing.map_or(0, |row| row.len());
            let decision = if proposed > existing {
                Decision::AcceptProposed
            } else {
                Decision::IgnoreProposed
            };

            Ok(decision.to_string())
        }
    }

    fn event() -> ChangeEvent {
        ChangeEvent {
            key: Bytes::from_static(b"k"),
            value: Some(Bytes::from_static(b"long value")),
            origin_timestamp: None,
            mvcc_timestamp: Timestamp::new(1, 0),
            prev_value: Some(PrevImage {
                value: Some(Bytes::from_static(b"old")),
                mvcc_timestamp: Timestamp::new(0, 5),
            }),
        }
    }

    fn existing() -> VersionedValue {
        VersionedValue {
            value: KvValue {
                row: Some(Bytes::from_static(b"short")),
                origin_timestamp: None,
            },
            mvcc_timestamp: Timestamp::new(100, 0),
        }
    }

    fn resolver<F: ConflictFunction + 'static>(function: F) -> UdfResolver {
        UdfResolver::new("test".to_owned(), Arc::new(function))
    }

    #[test]
    fn builds_arguments_from_the_change_and_local_row() {
        let args = ConflictFunctionArgs::new(&event(), &existing());

        assert_eq!(args.action, ConflictAction::Upsert);
        assert_eq!(args.previous, Some(Bytes::from_static(b"old")));
        assert_eq!(args.existing_mvcc_timestamp, Timestamp::new(100, 0));
        assert_eq!(
            args.proposed_previous_mvcc_timestamp,
            Some(Timestamp::new(0, 5))
        );
    }

    #[tokio::test]
    async fn uses_the_function_decision() {
        let decision = resolver(Longest).resolve(&event(), &existing()).await.unwrap();
        assert_eq!(decision, Decision::AcceptProposed);

        let decision = resolver(Fixed("ignore_proposed"))
            .resolve(&event(), &existing())
            .await
            .unwrap();
        assert_eq!(decision, Decision::IgnoreProposed);
    }

    #[tokio::test]
    async fn failures_are_transient() {
        for function in [resolver(Failing), resolver(Fixed("maybe"))] {
            let err = function.resolve(&event(), &existing()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConflictFunctionFailed);
            assert!(err.retry_eligibility() == crate::error::RetryEligibility::Retryable);
        }
    }
}
