use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{BatchConfig, RetryConfig, ValidationError};

/// Starting point of a job, as a hybrid-logical timestamp.
///
/// Events whose source time is at or before the cursor are not replicated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CursorConfig {
    /// Wall clock component in nanoseconds.
    pub wall_time: i64,
    /// Logical component.
    #[serde(default)]
    pub logical: i32,
}

/// Bounded retry buffer for events that failed to apply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PurgatoryConfig {
    /// Maximum number of buffered event bytes. Tunable at runtime.
    pub byte_limit: u64,
    /// Interval, in milliseconds, between scheduled retries of buffered events.
    pub flush_interval_ms: u64,
}

impl Default for PurgatoryConfig {
    fn default() -> Self {
        Self {
            byte_limit: 512 << 20,
            flush_interval_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Interval, in milliseconds, between producer heartbeats. Tunable at runtime.
    pub frequency_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            frequency_ms: 30_000,
        }
    }
}

/// Topology-driven replanning of the flow.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ReplanConfig {
    /// Fraction of ideal nodes missing from the current plan above which the flow is replanned.
    ///
    /// `0` disables replanning.
    pub threshold: f64,
    /// Interval, in milliseconds, between topology samples.
    pub frequency_ms: u64,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            frequency_ms: 600_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// Interval, in milliseconds, between writes of the job progress record.
    pub frequency_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { frequency_ms: 1000 }
    }
}

/// How change events are turned into KV writes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ApplyConfig {
    /// Write events without a previous image as conditional inserts before reading the row.
    pub optimistic_insert: bool,
    /// Number of times a failed conditional write is re-resolved before the event is deferred.
    pub max_condition_retries: u32,
    /// Number of attempts of a batch transaction that keeps hitting retryable KV errors.
    pub max_txn_attempts: u32,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            optimistic_insert: true,
            max_condition_retries: 3,
            max_txn_attempts: 10,
        }
    }
}

/// Conflict resolution strategy used by the row applier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionConfig {
    /// Last-writer-wins on replication timestamps.
    #[default]
    Lww,
    /// A registered conflict resolution function.
    Udf { function_name: String },
}

/// Where events that cannot be applied are recorded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterQueueConfig {
    #[default]
    Memory,
    /// JSON lines written under `path`.
    File { path: String },
}

/// Configuration of a logical replication ingestion job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct IngestionConfig {
    /// The unique identifier of the job.
    pub id: u64,
    /// Identifier of the producer-side replication stream.
    pub stream_id: String,
    /// Optional explicit starting point, only used if the job has no persisted progress.
    #[serde(default)]
    pub cursor: Option<CursorConfig>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub purgatory: PurgatoryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub replan: ReplanConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub conflict_resolution: ConflictResolutionConfig,
    #[serde(default)]
    pub dead_letter_queue: DeadLetterQueueConfig,
}

impl IngestionConfig {
    /// Creates a configuration with default settings for the given job and stream.
    pub fn new(id: u64, stream_id: impl Into<String>) -> Self {
        Self {
            id,
            stream_id: stream_id.into(),
            cursor: None,
            batch: BatchConfig::default(),
            purgatory: PurgatoryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            replan: ReplanConfig::default(),
            checkpoint: CheckpointConfig::default(),
            retry: RetryConfig::default(),
            apply: ApplyConfig::default(),
            conflict_resolution: ConflictResolutionConfig::default(),
            dead_letter_queue: DeadLetterQueueConfig::default(),
        }
    }

    /// Validates the job configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stream_id.trim().is_empty() {
            return Err(ValidationError::EmptyStreamId);
        }

        if self.batch.max_size == 0 {
            return Err(ValidationError::BatchMaxSizeZero);
        }

        for (name, value) in [
            ("batch.max_fill_ms", self.batch.max_fill_ms),
            ("purgatory.flush_interval_ms", self.purgatory.flush_interval_ms),
            ("heartbeat.frequency_ms", self.heartbeat.frequency_ms),
            ("replan.frequency_ms", self.replan.frequency_ms),
            ("checkpoint.frequency_ms", self.checkpoint.frequency_ms),
        ] {
            if value == 0 {
                return Err(ValidationError::ZeroInterval(name));
            }
        }

        if !(0.0..=1.0).contains(&self.replan.threshold) {
            return Err(ValidationError::ReplanThresholdOutOfRange(
                self.replan.threshold,
            ));
        }

        if self.apply.max_txn_attempts == 0 {
            return Err(ValidationError::InvalidConfig(
                "`apply.max_txn_attempts` cannot be zero".to_owned(),
            ));
        }

        if let ConflictResolutionConfig::Udf { function_name } = &self.conflict_resolution
            && function_name.trim().is_empty()
        {
            return Err(ValidationError::EmptyFunctionName);
        }

        if let DeadLetterQueueConfig::File { path } = &self.dead_letter_queue
            && path.trim().is_empty()
        {
            return Err(ValidationError::InvalidConfig(
                "`dead_letter_queue.path` must not be empty".to_owned(),
            ));
        }

        self.retry.validate()
    }
}

impl Config for IngestionConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(IngestionConfig::new(1, "stream-1").validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_replan_threshold() {
        let mut config = IngestionConfig::new(1, "stream-1");
        config.replan.threshold = 1.5;

        assert_eq!(
            config.validate(),
            Err(ValidationError::ReplanThresholdOutOfRange(1.5))
        );
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut config = IngestionConfig::new(1, "stream-1");
        config.heartbeat.frequency_ms = 0;

        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroInterval("heartbeat.frequency_ms"))
        );
    }

    #[test]
    fn rejects_unnamed_conflict_function() {
        let mut config = IngestionConfig::new(1, "stream-1");
        config.conflict_resolution = ConflictResolutionConfig::Udf {
            function_name: " ".to_owned(),
        };

        assert_eq!(config.validate(), Err(ValidationError::EmptyFunctionName));
    }

    #[test]
    fn deserializes_sparse_yaml_with_defaults() {
        let yaml = r#"
id: 42
stream_id: "s-1"
cursor:
  wall_time: 1000
conflict_resolution:
  udf:
    function_name: "my_resolver"
"#;

        let config: IngestionConfig = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.id, 42);
        assert_eq!(
            config.cursor,
            Some(CursorConfig {
                wall_time: 1000,
                logical: 0
            })
        );
        assert_eq!(
            config.conflict_resolution,
            ConflictResolutionConfig::Udf {
                function_name: "my_resolver".to_owned()
            }
        );
        assert_eq!(config.batch, BatchConfig::default());
        assert!(config.validate().is_ok());
    }
}
