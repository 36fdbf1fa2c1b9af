use std::error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Convenient result type for ingestion operations using [`LdrError`] as the error type.
pub type LdrResult<T> = Result<T, LdrError>;

/// Main error type for ingestion operations.
///
/// [`LdrError`] can represent a single error, an error with additional detail, or multiple
/// aggregated errors. Every error exposes an [`ErrorKind`] which drives how the ingestion core
/// reacts to it: retried in place, parked in purgatory, dead-lettered, or escalated to a flow
/// restart or a job failure.
#[derive(Debug, Clone)]
pub struct LdrError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<LdrError>),
}

/// Specific categories of errors that can occur while ingesting a replication stream.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorKind {
    // Write application errors
    ConditionFailed,
    TransactionRetry,
    KvUnavailable,
    SchemaMismatch,
    InvalidData,
    ConflictFunctionFailed,
    SyntheticFailure,

    // Flow errors
    ProducerUnavailable,
    PlanChanged,
    SourceError,

    // Dead letter queue errors
    DeadLetterQueueWriteFailed,

    // Setup errors
    InvalidTableDescriptor,
    ConfigError,
    ValidationError,

    // State & workflow errors
    InvalidState,
    ProgressStoreError,
    WriterWorkerPanic,
    MonitorWorkerPanic,
    JobCanceled,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,

    // Special error kinds used for tests that trigger specific retry behaviors via fault injection.
    #[cfg(feature = "failpoints")]
    WithNoRetry,
    #[cfg(feature = "failpoints")]
    WithRetry,
}

/// Whether a failed event may succeed if it is applied again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryEligibility {
    Retryable,
    NotRetryable,
}

impl ErrorKind {
    fn retry_eligibility(self) -> RetryEligibility {
        match self {
            ErrorKind::SchemaMismatch
            | ErrorKind::InvalidData
            | ErrorKind::InvalidTableDescriptor
            | ErrorKind::ValidationError
            | ErrorKind::ConfigError
            | ErrorKind::DeadLetterQueueWriteFailed
            | ErrorKind::JobCanceled => RetryEligibility::NotRetryable,
            #[cfg(feature = "failpoints")]
            ErrorKind::WithNoRetry => RetryEligibility::NotRetryable,
            _ => RetryEligibility::Retryable,
        }
    }

    fn restarts_flow(self) -> bool {
        match self {
            ErrorKind::ProducerUnavailable
            | ErrorKind::PlanChanged
            | ErrorKind::SourceError
            | ErrorKind::KvUnavailable
            | ErrorKind::ProgressStoreError
            | ErrorKind::WriterWorkerPanic
            | ErrorKind::MonitorWorkerPanic
            | ErrorKind::IoError => true,
            #[cfg(feature = "failpoints")]
            ErrorKind::WithRetry => true,
            _ => false,
        }
    }
}

impl LdrError {
    /// Creates an [`LdrError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<LdrError>) -> LdrError {
        LdrError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregated errors.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Classifies the error for an event that failed to apply.
    ///
    /// An aggregated error is retryable only if every contained error is.
    pub fn retry_eligibility(&self) -> RetryEligibility {
        let kinds = self.kinds();
        if kinds.is_empty() {
            return ErrorKind::Unknown.retry_eligibility();
        }

        if kinds
            .iter()
            .all(|kind| kind.retry_eligibility() == RetryEligibility::Retryable)
        {
            RetryEligibility::Retryable
        } else {
            RetryEligibility::NotRetryable
        }
    }

    /// Returns `true` if the whole replication flow should be rebuilt after this error, `false`
    /// if the job must fail.
    ///
    /// An aggregated error restarts the flow only if every contained error does.
    pub fn restarts_flow(&self) -> bool {
        let kinds = self.kinds();

        !kinds.is_empty() && kinds.iter().all(|kind| kind.restarts_flow())
    }
}

impl PartialEq for LdrError {
    fn eq(&self, other: &LdrError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for LdrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for LdrError {}

impl From<(ErrorKind, &'static str)> for LdrError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> LdrError {
        LdrError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for LdrError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> LdrError {
        LdrError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for LdrError
where
    E: Into<LdrError>,
{
    fn from(errors: Vec<E>) -> LdrError {
        LdrError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for LdrError {
    fn from(err: std::io::Error) -> LdrError {
        LdrError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps syntax and data failures to [`ErrorKind::DeserializationError`] and the rest to the
/// matching I/O or serialization kind.
impl From<serde_json::Error> for LdrError {
    fn from(err: serde_json::Error) -> LdrError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        LdrError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<ldr_config::shared::ValidationError> for LdrError {
    fn from(err: ldr_config::shared::ValidationError) -> LdrError {
        LdrError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ValidationError,
                "Invalid ingestion configuration",
                err.to_string(),
            ),
        }
    }
}
