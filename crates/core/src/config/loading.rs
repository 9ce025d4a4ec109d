use std::path::Path;

use tracing::{debug, info};

use crate::error::ConfigError;

use super::types::SpillwayConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

impl SpillwayConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "read spillway config");
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        info!("Config loaded:");
        info!(
            "  scheduler:  local_workers={}, remote_pool_size={}",
            self.scheduler.resolved_local_workers(),
            self.scheduler.remote_pool_size
        );
        info!(
            "  remote:     endpoint={}, timeout={}s",
            self.remote.endpoint, self.remote.timeout_secs
        );
        info!("  cost:       enabled={}", self.cost.enabled);
        info!(
            "  manager:    depth={}, parallelism={}, iterations_per_wave={}, drain={:?}",
            self.manager.depth,
            self.manager.parallelism,
            self.manager.iterations_per_wave,
            self.manager.drain
        );
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `SPILLWAY_SECTION_KEY` overrides `section.key`, except
    /// for the most common manager knobs which drop the section name:
    /// - `SPILLWAY_LOCAL_WORKERS` -> `scheduler.local_workers`
    /// - `SPILLWAY_REMOTE_POOL_SIZE` -> `scheduler.remote_pool_size`
    /// - `SPILLWAY_REMOTE_ENDPOINT` -> `remote.endpoint`
    /// - `SPILLWAY_REMOTE_TIMEOUT_SECS` -> `remote.timeout_secs`
    /// - `SPILLWAY_COST_ENABLED` -> `cost.enabled`
    /// - `SPILLWAY_PARALLELISM` -> `manager.parallelism`
    /// - `SPILLWAY_ITERATIONS_PER_WAVE` -> `manager.iterations_per_wave`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("SPILLWAY_LOCAL_WORKERS") {
            self.scheduler.local_workers = v;
        }
        if let Some(v) = env_parse("SPILLWAY_REMOTE_POOL_SIZE") {
            self.scheduler.remote_pool_size = v;
        }
        if let Some(v) = env_opt("SPILLWAY_REMOTE_ENDPOINT") {
            self.remote.endpoint = v;
        }
        if let Some(v) = env_parse("SPILLWAY_REMOTE_TIMEOUT_SECS") {
            self.remote.timeout_secs = v;
        }
        if let Some(v) = env_parse("SPILLWAY_COST_ENABLED") {
            self.cost.enabled = v;
        }
        if let Some(v) = env_parse("SPILLWAY_PARALLELISM") {
            self.manager.parallelism = v;
        }
        if let Some(v) = env_parse("SPILLWAY_ITERATIONS_PER_WAVE") {
            self.manager.iterations_per_wave = v;
        }
    }
}
