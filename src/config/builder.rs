use super::{ConfigResult, CoordinatorConfig, PartialResultsPolicy};

/// Builder for CoordinatorConfig that wraps the config itself
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership
    pub fn from_config(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    // ==================== Timeouts ====================

    pub fn shard_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.shard_timeout_ms = timeout_ms;
        self
    }

    pub fn request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.request_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn no_request_timeout(mut self) -> Self {
        self.config.request_timeout_ms = None;
        self
    }

    // ==================== Round control ====================

    pub fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.config.max_rounds = max_rounds;
        self
    }

    pub fn partial_results(mut self, policy: PartialResultsPolicy) -> Self {
        self.config.partial_results = policy;
        self
    }

    pub fn strict(self) -> Self {
        self.partial_results(PartialResultsPolicy::Strict)
    }

    // ==================== Dispatch ====================

    pub fn coalesce_requests(mut self, enable: bool) -> Self {
        self.config.coalesce_requests = enable;
        self
    }

    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = Some(limit);
        self
    }

    pub fn build(self) -> ConfigResult<CoordinatorConfig> {
        self.build_with_validation(true)
    }

    pub fn build_unchecked(self) -> CoordinatorConfig {
        self.config
    }

    pub fn build_with_validation(self, validate: bool) -> ConfigResult<CoordinatorConfig> {
        if validate {
            self.config.validate()?;
        }
        Ok(self.config)
    }
}

impl From<CoordinatorConfigBuilder> for CoordinatorConfig {
    fn from(builder: CoordinatorConfigBuilder) -> Self {
        builder.config
    }
}
