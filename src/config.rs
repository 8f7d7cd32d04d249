//! Engine configuration (component K), loaded the way the teacher
//! loads its own config: the `config` crate layered over defaults, a
//! TOML file, and environment variables (see `config/mod.rs` upstream
//! of this module's own teacher ancestor).

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Tunables the source hardcoded as two 10-second `asyncio.sleep`
/// calls inside `retry()`. Resolved as an Open Question (§9): both
/// pauses become one configurable backoff so a deployment can tune it
/// without touching engine code.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long `retry()` waits after marking a task `READY_TO_RETRY`
    /// before pushing the `RETRY` event, and again after that before
    /// pushing `RUN` — lets a flaky dependency settle before rerunning.
    pub retry_settle_delay_ms: u64,

    /// Channel capacity for the `mpsc` fan-in each
    /// [`crate::engine::combine::CombineLatest`] uses internally.
    pub combine_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retry_settle_delay_ms: 10_000,
            combine_channel_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn retry_settle_delay(&self) -> Duration {
        Duration::from_millis(self.retry_settle_delay_ms)
    }

    /// Layers, lowest to highest priority: built-in defaults, an
    /// optional `cascade.toml` in the working directory, then
    /// `CASCADE_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        let settings = Config::builder()
            .set_default("retry_settle_delay_ms", defaults.retry_settle_delay_ms)?
            .set_default("combine_channel_capacity", defaults.combine_channel_capacity as i64)?
            .add_source(File::with_name("cascade").required(false))
            .add_source(Environment::with_prefix("CASCADE"))
            .build()?;
        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.retry_settle_delay(), Duration::from_secs(10));
        assert!(cfg.combine_channel_capacity > 0);
    }
}
