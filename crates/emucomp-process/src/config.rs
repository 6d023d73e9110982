//! Runner configuration.

use crate::error::{ProcessError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on captured bytes per output stream (16 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// Tunables shared by every runner created from the same configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// How long `stop()` waits after SIGTERM before falling back to SIGKILL.
    pub stop_timeout: Duration,
    /// Maximum number of bytes kept per captured stream.
    ///
    /// Output past this limit is still read from the pipe, then discarded.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl RunnerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.stop_timeout.is_zero() {
            return Err(ProcessError::Config("stop_timeout must be > 0".into()));
        }

        if self.max_output_bytes == 0 {
            return Err(ProcessError::Config("max_output_bytes must be > 0".into()));
        }

        Ok(())
    }
}
