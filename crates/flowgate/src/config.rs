//! Configuration for the flow-control sink

use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`FlowSink`](crate::FlowSink)
///
/// The two ceilings and the window length are the only tunables. All three
/// must be positive; zero values are rejected by [`FlowConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Maximum bytes admitted but not yet persisted downstream
    pub buffer_capacity: usize,

    /// Maximum bytes admitted per window
    pub rate_ceiling: usize,

    /// Length of the fixed rate window
    pub window: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64 * 1024,
            rate_ceiling: 1024 * 1024,
            window: Duration::from_secs(1),
        }
    }
}

impl FlowConfig {
    /// Create a configuration from the three tunables, validating them
    pub fn new(buffer_capacity: usize, rate_ceiling: usize, window: Duration) -> FlowResult<Self> {
        let config = Self {
            buffer_capacity,
            rate_ceiling,
            window,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every tunable is positive
    pub fn validate(&self) -> FlowResult<()> {
        if self.buffer_capacity == 0 {
            return Err(FlowError::invalid_configuration(
                "buffer_capacity must be positive",
            ));
        }
        if self.rate_ceiling == 0 {
            return Err(FlowError::invalid_configuration(
                "rate_ceiling must be positive",
            ));
        }
        if self.window.is_zero() {
            return Err(FlowError::invalid_configuration("window must be positive"));
        }
        Ok(())
    }
}
