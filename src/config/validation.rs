use super::{ConfigError, ConfigResult, CoordinatorConfig};

pub(crate) struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &CoordinatorConfig) -> ConfigResult<()> {
        Self::validate_timeouts(config)?;
        Self::validate_limits(config)?;
        Ok(())
    }

    fn validate_timeouts(config: &CoordinatorConfig) -> ConfigResult<()> {
        if config.shard_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "shard_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }

        if let Some(request_timeout_ms) = config.request_timeout_ms {
            if request_timeout_ms == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "request_timeout_ms".to_string(),
                    value: "0".to_string(),
                    reason: "Must be > 0 when set".to_string(),
                });
            }
        }

        Ok(())
    }

    fn validate_limits(config: &CoordinatorConfig) -> ConfigResult<()> {
        if config.max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_rounds".to_string(),
                value: "0".to_string(),
                reason: "Must allow at least one round".to_string(),
            });
        }

        if config.max_concurrent_calls == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_calls".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0 when set".to_string(),
            });
        }

        Ok(())
    }
}
