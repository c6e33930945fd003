//! Driver names to concrete drivers

use std::sync::Arc;

use parley_core::config::EffectiveProviderConfig;
use parley_core::error::{AgentError, Result};
use parley_core::provider::{DriverFactory, LlmDriver};

use crate::gemini::GeminiDriver;
use crate::openai::OpenAiDriver;

/// Builds `openai`, `openai_compatible` and `gemini` drivers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDriverFactory;

impl DriverFactory for DefaultDriverFactory {
    fn create(&self, config: &EffectiveProviderConfig) -> Result<Arc<dyn LlmDriver>> {
        tracing::debug!(provider = %config.label, driver = %config.driver, model = %config.options.model, "Creating driver");

        match config.driver.as_str() {
            "openai" => Ok(Arc::new(OpenAiDriver::new(config)?)),
            "openai_compatible" => Ok(Arc::new(OpenAiDriver::compatible(config)?)),
            "gemini" => Ok(Arc::new(GeminiDriver::new(config)?)),
            other => Err(AgentError::Config(format!(
                "Provider '{}' uses unknown driver '{other}'",
                config.label
            ))),
        }
    }
}
