use std::time::Duration;

use keyword_core::DEFAULT_KEYWORD_TIMEOUT_MS;

/// Engine-level configuration for keyword invocation.
///
/// Controls default timeouts, how long a timed-out worker is given to
/// acknowledge cancellation, and concurrency limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to keywords that declare none, in milliseconds.
    pub default_timeout_ms: u64,
    /// How long to wait, after the deadline, for a cancelled worker to stop.
    /// Decides between the "interrupted" and "could not be interrupted"
    /// timeout reports.
    pub cancellation_grace_ms: u64,
    /// Maximum number of concurrent invocations before load shedding.
    pub max_concurrent_invocations: u32,
    /// Attach a worker snapshot to timeout results.
    pub capture_diagnostics: bool,
}

impl EngineConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_KEYWORD_TIMEOUT_MS,
            cancellation_grace_ms: 100,
            max_concurrent_invocations: 64,
            capture_diagnostics: true,
        }
    }
}
