use std::fmt;
use std::future::Future;
use std::str::FromStr;

use ldr_config::shared::ConflictResolutionConfig;
use tracing::info;

use crate::error::{ErrorKind, LdrError, LdrResult};
use crate::kv::VersionedValue;
use crate::ldr_error;
use crate::resolver::{FunctionRegistry, LwwResolver, UdfResolver};
use crate::types::ChangeEvent;

const ACCEPT_PROPOSED: &str = "accept_proposed";
const IGNORE_PROPOSED: &str = "ignore_proposed";

/// Outcome of resolving a replicated change against the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The replicated change overwrites the local row.
    AcceptProposed,
    /// The local row is kept and the change is dropped.
    IgnoreProposed,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::AcceptProposed => f.write_str(ACCEPT_PROPOSED),
            Decision::IgnoreProposed => f.write_str(IGNORE_PROPOSED),
        }
    }
}

impl FromStr for Decision {
    type Err = LdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ACCEPT_PROPOSED => Ok(Decision::AcceptProposed),
            IGNORE_PROPOSED => Ok(Decision::IgnoreProposed),
            other => Err(ldr_error!(
                ErrorKind::ConflictFunctionFailed,
                "Conflict function returned an unknown decision",
                format!("expected '{ACCEPT_PROPOSED}' or '{IGNORE_PROPOSED}', got '{other}'")
            )),
        }
    }
}

/// Decides whether a replicated change replaces an existing local row.
pub trait ConflictResolver {
    fn resolve(
        &self,
        event: &ChangeEvent,
        existing: &VersionedValue,
    ) -> impl Future<Output = LdrResult<Decision>> + Send;
}

/// The resolver configured for a job.
#[derive(Debug, Clone)]
pub enum Resolver {
    Lww(LwwResolver),
    Udf(UdfResolver),
}

impl ConflictResolver for Resolver {
    async fn resolve(&self, event: &ChangeEvent, existing: &VersionedValue) -> LdrResult<Decision> {
        match self {
            Resolver::Lww(resolver) => resolver.resolve(event, existing).await,
            Resolver::Udf(resolver) => resolver.resolve(event, existing).await,
        }
    }
}

/// Builds the resolver selected by `config`.
///
/// Fails with [`ErrorKind::ConfigError`] if a conflict function is configured but not registered.
pub fn build_resolver(
    config: &ConflictResolutionConfig,
    registry: &FunctionRegistry,
) -> LdrResult<Resolver> {
    match config {
        ConflictResolutionConfig::Lww => {
            info!("using last-writer-wins conflict resolution");

            Ok(Resolver::Lww(LwwResolver))
        }
        ConflictResolutionConfig::Udf { function_name } => {
            let function = registry.get(function_name).ok_or_else(|| {
                ldr_error!(
                    ErrorKind::ConfigError,
                    "Unknown conflict resolution function",
                    format!("no function named '{function_name}' is registered")
                )
            })?;
            info!(function_name, "using a conflict resolution function");

            Ok(Resolver::Udf(UdfResolver::new(function_name.clone(), function)))
        }
    }
}
