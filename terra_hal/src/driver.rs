//! Sensor driver trait and error types.

use thiserror::Error;

use terra_common::config::TerraConfig;
use terra_common::types::sensor::SensorSample;

/// Error types for HAL operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Driver initialization failed.
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Hardware communication error.
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),
}

/// Interface for pluggable sensor drivers.
///
/// # Lifecycle
///
/// 1. `init()` - called once before the driver task starts.
/// 2. `sample()` - called every `1/rate_hz` seconds from the driver task;
///    returning `None` skips the publish for this tick (no data ready).
///
/// Drivers are opaque to the core: whatever they do internally, the only
/// output is the typed sample.
pub trait SensorDriver: Send {
    /// Stable driver name - becomes the topic segment in
    /// `sensor.<name>.updated`.
    fn name(&self) -> &'static str;

    /// Rated sample frequency.
    fn rate_hz(&self) -> u64;

    /// Initialize the driver. May block; runs before the driver task loop.
    fn init(&mut self, config: &TerraConfig) -> Result<(), HalError> {
        let _ = config;
        Ok(())
    }

    /// Produce the next sample, stamped with the given monotonic time.
    fn sample(&mut self, now_ns: u64) -> Option<SensorSample>;
}
