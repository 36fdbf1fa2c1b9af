//! Settings that can be tuned while a job is running.

use std::sync::Arc;
use std::time::Duration;

use ldr_config::shared::IngestionConfig;
use tokio::sync::watch;
use tracing::{info, warn};

/// Smallest interval accepted for the periodic workers, the granularity of the configured
/// intervals.
pub const MIN_FREQUENCY: Duration = Duration::from_millis(1);

/// Values of the runtime tunable settings at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsSnapshot {
    pub purgatory_byte_limit: u64,
    pub heartbeat_frequency: Duration,
    pub replan_threshold: f64,
    pub replan_frequency: Duration,
}

impl From<&IngestionConfig> for SettingsSnapshot {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            purgatory_byte_limit: config.purgatory.byte_limit,
            heartbeat_frequency: Duration::from_millis(config.heartbeat.frequency_ms),
            replan_threshold: config.replan.threshold,
            replan_frequency: Duration::from_millis(config.replan.frequency_ms),
        }
    }
}

/// Shared handle to the runtime tunable settings of a job.
///
/// Workers read the current values when they need them, so changes apply without restarting
/// the flow.
#[derive(Debug, Clone)]
pub struct DynamicSettings {
    tx: Arc<watch::Sender<SettingsSnapshot>>,
}

impl DynamicSettings {
    pub fn new(snapshot: SettingsSnapshot) -> Self {
        let (tx, _) = watch::channel(snapshot);

        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SettingsSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_purgatory_byte_limit(&self, byte_limit: u64) {
        info!(byte_limit, "setting purgatory byte limit");
        self.tx
            .send_modify(|settings| settings.purgatory_byte_limit = byte_limit);
    }

    /// Sets the heartbeat frequency, raised to [`MIN_FREQUENCY`].
    pub fn set_heartbeat_frequency(&self, frequency: Duration) {
        let frequency = clamp_frequency(frequency);
        info!(?frequency, "setting heartbeat frequency");
        self.tx
            .send_modify(|settings| settings.heartbeat_frequency = frequency);
    }

    /// Sets the replan threshold, clamped to `[0, 1]`.
    pub fn set_replan_threshold(&self, threshold: f64) {
        let threshold = threshold.clamp(0.0, 1.0);
        info!(threshold, "setting replan threshold");
        self.tx
            .send_modify(|settings| settings.replan_threshold = threshold);
    }

    /// Sets the replan frequency, raised to [`MIN_FREQUENCY`].
    pub fn set_replan_frequency(&self, frequency: Duration) {
        let frequency = clamp_frequency(frequency);
        info!(?frequency, "setting replan frequency");
        self.tx
            .send_modify(|settings| settings.replan_frequency = frequency);
    }
}

fn clamp_frequency(frequency: Duration) -> Duration {
    if frequency < MIN_FREQUENCY {
        warn!(?frequency, minimum = ?MIN_FREQUENCY, "frequency below the minimum, using the minimum");
        return MIN_FREQUENCY;
    }

    frequency
}

impl From<&IngestionConfig> for DynamicSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self::new(SettingsSnapshot::from(config))
    }
}
