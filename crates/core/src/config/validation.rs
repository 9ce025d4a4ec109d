use crate::error::ConfigError;

use super::types::{DrainPolicy, SpillwayConfig};

impl SpillwayConfig {
    /// Validate the config: pool sizes, wave shape, pre-split and endpoint scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_scheduler()?;
        self.validate_manager()?;
        self.validate_endpoint()?;
        Ok(())
    }

    fn validate_scheduler(&self) -> Result<(), ConfigError> {
        if self.scheduler.remote_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.remote_pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn validate_manager(&self) -> Result<(), ConfigError> {
        let m = &self.manager;
        if m.parallelism == 0 {
            return Err(ConfigError::Invalid("manager.parallelism must be at least 1".into()));
        }
        if m.iterations_per_wave == 0 {
            return Err(ConfigError::Invalid(
                "manager.iterations_per_wave must be at least 1".into(),
            ));
        }
        if m.depth == 0 {
            return Err(ConfigError::Invalid("manager.depth must be positive".into()));
        }
        if let DrainPolicy::Poll { n: 0 } = m.drain {
            return Err(ConfigError::Invalid("manager.drain poll size must be at least 1".into()));
        }
        if let Some(presplit) = &m.presplit {
            if presplit.split_factor < 2 {
                return Err(ConfigError::Invalid(
                    "manager.presplit.split_factor must be at least 2".into(),
                ));
            }
        }
        for (i, step) in m.steps.iter().enumerate() {
            if step.parallelism == 0 || step.iterations == 0 {
                return Err(ConfigError::Invalid(format!(
                    "manager.steps[{i}] needs a non-zero parallelism and iteration budget"
                )));
            }
        }
        Ok(())
    }

    fn validate_endpoint(&self) -> Result<(), ConfigError> {
        let endpoint = self.remote.endpoint.as_str();
        if endpoint == "in-process"
            || endpoint.starts_with("tcp://")
            || endpoint.starts_with("ipc://")
        {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "invalid remote endpoint '{endpoint}', expected 'in-process', 'tcp://' or 'ipc://'"
            )))
        }
    }
}
