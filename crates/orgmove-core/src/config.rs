//! Engine configuration.

use std::time::Duration;

/// Default propagation wait between stages.
pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_secs(10);

pub const PROPAGATION_DELAY_ENV: &str = "ORGMOVE_PROPAGATION_DELAY_SECS";
pub const FINAL_DELAY_ENV: &str = "ORGMOVE_FINAL_DELAY_SECS";

/// Timing knobs for the orchestrator and rollback controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Wait after stages 1-3 and between compensating steps.
    pub propagation_delay: Duration,
    /// Wait after stage 4, before the run reports success.
    pub final_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            propagation_delay: DEFAULT_PROPAGATION_DELAY,
            final_delay: DEFAULT_PROPAGATION_DELAY,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ORGMOVE_PROPAGATION_DELAY_SECS` and
    /// `ORGMOVE_FINAL_DELAY_SECS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(d) = secs_from_env(PROPAGATION_DELAY_ENV) {
            config.propagation_delay = d;
        }
        if let Some(d) = secs_from_env(FINAL_DELAY_ENV) {
            config.final_delay = d;
        }
        config
    }

    /// No waits at all. Test helper.
    pub fn immediate() -> Self {
        Self {
            propagation_delay: Duration::ZERO,
            final_delay: Duration::ZERO,
        }
    }

    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    pub fn with_final_delay(mut self, delay: Duration) -> Self {
        self.final_delay = delay;
        self
    }
}

fn secs_from_env(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring non-numeric delay");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ten_seconds() {
        let c = EngineConfig::default();
        assert_eq!(c.propagation_delay, Duration::from_secs(10));
        assert_eq!(c.final_delay, Duration::from_secs(10));
    }

    #[test]
    fn builders_override() {
        let c = EngineConfig::immediate().with_final_delay(Duration::from_secs(3));
        assert_eq!(c.propagation_delay, Duration::ZERO);
        assert_eq!(c.final_delay, Duration::from_secs(3));
    }
}
