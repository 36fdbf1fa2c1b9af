use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The stream identifier is empty.
    #[error("`stream_id` must not be empty")]
    EmptyStreamId,

    /// A batch cannot hold zero events.
    #[error("`batch.max_size` cannot be zero")]
    BatchMaxSizeZero,

    /// A periodic task was configured with a zero interval.
    #[error("`{0}` must be greater than zero")]
    ZeroInterval(&'static str),

    /// The replan threshold is outside of `[0, 1]`.
    #[error("`replan.threshold` must be between 0 and 1, got {0}")]
    ReplanThresholdOutOfRange(f64),

    /// The retry policy cannot make progress.
    #[error("Invalid retry config: {0}")]
    InvalidRetry(&'static str),

    /// The conflict resolution function name is empty.
    #[error("`conflict_resolution.function_name` must not be empty")]
    EmptyFunctionName,

    /// General configuration validation error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
