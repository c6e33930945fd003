//! Configuration
//!
//! Explicit configuration passed into agents and contexts: the provider
//! registry, provider sequence entries, and default storage driver lists.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::provider::{DEFAULT_MODEL, GenerationOptions};
use crate::storage::StorageDriver;
use crate::storage::memory::InMemoryStorage;

/// Label of the provider used when nothing else is configured.
pub const DEFAULT_PROVIDER: &str = "default";

/// One provider in the registry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry label; filled from the registry key when omitted
    #[serde(default, skip_serializing)]
    pub label: String,

    /// Driver identifier understood by the driver factory (e.g. "openai", "gemini")
    pub driver: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Provider tunables (temperature, max_tokens, ...)
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ProviderConfig {
    pub fn new(label: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            driver: driver.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Settings as a flat map, unset fields omitted
    fn to_settings(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(AgentError::Config(format!(
                "Provider '{}' did not serialize to an object",
                self.label
            ))),
        }
    }
}

/// One element of a provider sequence
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEntry {
    /// Use the registry configuration as-is
    Label(String),
    /// Registry configuration with per-entry overrides
    LabelWithOverride(String, Map<String, Value>),
}

impl ProviderEntry {
    pub fn label(&self) -> &str {
        match self {
            Self::Label(label) | Self::LabelWithOverride(label, _) => label,
        }
    }

    pub const fn overrides(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Label(_) => None,
            Self::LabelWithOverride(_, overrides) => Some(overrides),
        }
    }

    /// Entry with an override value, which must be a JSON object.
    pub fn with_override(label: impl Into<String>, overrides: Value) -> Result<Self> {
        let label = label.into();
        match overrides {
            Value::Object(map) => Ok(Self::LabelWithOverride(label, map)),
            other => Err(AgentError::Config(format!(
                "Override for provider '{label}' must be an object, got {other}"
            ))),
        }
    }

    /// Parse a sequence given as a label, a list of labels and
    /// `{label: overrides}` objects, or a single `{label: overrides}` object.
    pub fn parse_sequence(value: &Value) -> Result<Vec<Self>> {
        match value {
            Value::String(label) => Ok(vec![Self::Label(label.clone())]),
            Value::Array(items) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    entries.extend(Self::parse_sequence(item)?);
                }
                Ok(entries)
            }
            Value::Object(map) => map
                .iter()
                .map(|(label, overrides)| Self::with_override(label.clone(), overrides.clone()))
                .collect(),
            other => Err(AgentError::Config(format!(
                "Invalid provider entry: {other}"
            ))),
        }
    }

    /// `[default, fallback]` sequence for the deprecated single fallback field.
    pub fn legacy_sequence(default: impl Into<String>, fallback: Option<String>) -> Vec<Self> {
        let mut entries = vec![Self::Label(default.into())];
        if let Some(fallback) = fallback {
            entries.push(Self::Label(fallback));
        }
        entries
    }
}

impl From<&str> for ProviderEntry {
    fn from(label: &str) -> Self {
        Self::Label(label.to_string())
    }
}

/// Provider registry: label → configuration, plus the default sequence
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
    default_sequence: Vec<ProviderEntry>,
    fallback_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a provider
    pub fn register(&mut self, config: ProviderConfig) {
        self.providers.insert(config.label.clone(), config);
    }

    #[must_use]
    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.register(config);
        self
    }

    pub fn get(&self, label: &str) -> Option<&ProviderConfig> {
        self.providers.get(label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn set_default_sequence(&mut self, sequence: Vec<ProviderEntry>) {
        self.default_sequence = sequence;
    }

    /// Deprecated: prefer [`ProviderRegistry::set_default_sequence`].
    pub fn set_fallback_provider(&mut self, fallback: Option<String>) {
        self.fallback_provider = fallback;
    }

    pub fn fallback_provider(&self) -> Option<&str> {
        self.fallback_provider.as_deref()
    }

    /// Sequence used when an agent names none.
    pub fn default_sequence(&self) -> Vec<ProviderEntry> {
        if self.default_sequence.is_empty() {
            ProviderEntry::legacy_sequence(DEFAULT_PROVIDER, self.fallback_provider.clone())
        } else {
            self.default_sequence.clone()
        }
    }

    /// Fully merged settings for one sequence entry.
    ///
    /// Precedence: entry override, then registry config, then agent defaults.
    pub fn resolve(
        &self,
        entry: &ProviderEntry,
        agent_defaults: &Map<String, Value>,
    ) -> Result<EffectiveProviderConfig> {
        let base = self.get(entry.label()).ok_or_else(|| {
            AgentError::Config(format!("Provider '{}' is not configured", entry.label()))
        })?;

        let mut settings = Map::new();
        merge_settings(&mut settings, agent_defaults);
        merge_settings(&mut settings, &base.to_settings()?);
        if let Some(overrides) = entry.overrides() {
            merge_settings(&mut settings, overrides);
        }

        EffectiveProviderConfig::from_settings(entry.label(), settings)
    }
}

/// Later layers win; nulls never clear an earlier value.
fn merge_settings(target: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        if !value.is_null() {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Configuration a driver is built from for one attempt
#[derive(Clone, Debug)]
pub struct EffectiveProviderConfig {
    pub label: String,
    pub driver: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub options: GenerationOptions,
    /// Settings not understood by the core (driver-specific)
    pub extra: Map<String, Value>,
}

impl EffectiveProviderConfig {
    fn from_settings(label: &str, mut settings: Map<String, Value>) -> Result<Self> {
        let driver = take_string(&mut settings, "driver")
            .ok_or_else(|| AgentError::Config(format!("Provider '{label}' has no driver")))?;
        let model = take_string(&mut settings, "model").unwrap_or_else(|| DEFAULT_MODEL.into());

        #[allow(clippy::cast_possible_truncation)]
        let options = GenerationOptions {
            model,
            temperature: settings
                .remove("temperature")
                .and_then(|v| v.as_f64())
                .map(|v| v as f32),
            max_tokens: take_u32(&mut settings, "max_tokens"),
            top_p: settings
                .remove("top_p")
                .and_then(|v| v.as_f64())
                .map(|v| v as f32),
            top_k: take_u32(&mut settings, "top_k"),
            stop_sequences: settings
                .remove("stop_sequences")
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            response_schema: settings.remove("response_schema"),
            parallel_tool_calls: settings.remove("parallel_tool_calls").and_then(|v| v.as_bool()),
            tools: Vec::new(),
        };

        Ok(Self {
            label: label.to_string(),
            driver,
            api_key: take_string(&mut settings, "api_key"),
            api_url: take_string(&mut settings, "api_url"),
            options,
            extra: settings,
        })
    }
}

fn take_string(settings: &mut Map<String, Value>, key: &str) -> Option<String> {
    match settings.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_u32(settings: &mut Map<String, Value>, key: &str) -> Option<u32> {
    settings
        .remove(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}

/// Default storage driver lists
///
/// `Default` is the innermost fallback: one in-memory driver per list.
#[derive(Clone)]
pub struct StorageConfig {
    /// Drivers for generic storages and identity tracking
    pub default_drivers: Vec<Arc<dyn StorageDriver>>,
    /// Drivers for chat history
    pub history_drivers: Vec<Arc<dyn StorageDriver>>,
}

impl StorageConfig {
    pub fn new(
        default_drivers: Vec<Arc<dyn StorageDriver>>,
        history_drivers: Vec<Arc<dyn StorageDriver>>,
    ) -> Self {
        Self {
            default_drivers,
            history_drivers,
        }
    }

    /// Same drivers for every storage
    pub fn shared(drivers: Vec<Arc<dyn StorageDriver>>) -> Self {
        Self::new(drivers.clone(), drivers)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let memory: Arc<dyn StorageDriver> = Arc::new(InMemoryStorage::new());
        Self::shared(vec![memory])
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |drivers: &[Arc<dyn StorageDriver>]| {
            drivers.iter().map(|d| d.name().to_string()).collect::<Vec<_>>()
        };
        f.debug_struct("StorageConfig")
            .field("default_drivers", &names(&self.default_drivers))
            .field("history_drivers", &names(&self.history_drivers))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new()
            .with_provider(
                ProviderConfig::new("default", "openai")
                    .model("gpt-4o")
                    .api_key("k1")
                    .param("temperature", json!(0.2)),
            )
            .with_provider(ProviderConfig::new("gemini", "gemini").api_key("k2"))
    }

    #[test]
    fn test_parse_sequence_variants() {
        let entries =
            ProviderEntry::parse_sequence(&json!(["default", {"gemini": {"model": "x"}}])).unwrap();
        assert_eq!(entries[0], ProviderEntry::Label("default".into()));
        assert_eq!(entries[1].label(), "gemini");
        assert_eq!(entries[1].overrides().unwrap()["model"], "x");
    }

    #[test]
    fn test_object_sequence_keeps_written_order() {
        let entries: Vec<String> = ProviderEntry::parse_sequence(
            &serde_json::from_str(r#"{"zeta": {}, "alpha": {"model": "m"}}"#).unwrap(),
        )
        .unwrap()
        .iter()
        .map(|e| e.label().to_string())
        .collect();
        assert_eq!(entries, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_scalar_override_is_config_error() {
        let err = ProviderEntry::parse_sequence(&json!(["default", {"x": "not-an-array"}]))
            .unwrap_err();
        assert!(err.is_config());
        assert!(ProviderEntry::with_override("x", json!(5)).is_err());
    }

    #[test]
    fn test_override_beats_provider_beats_agent() {
        let agent = json!({"model": "agent-model", "temperature": 0.9, "max_tokens": 100});
        let agent = agent.as_object().unwrap();
        let entry = ProviderEntry::with_override("default", json!({"temperature": 0.5})).unwrap();

        let cfg = registry().resolve(&entry, agent).unwrap();
        assert_eq!(cfg.options.model, "gpt-4o");
        assert_eq!(cfg.options.temperature, Some(0.5));
        assert_eq!(cfg.options.max_tokens, Some(100));
        assert_eq!(cfg.api_key.as_deref(), Some("k1"));
    }

    #[test]
    fn test_agent_model_survives_provider_without_model() {
        let agent = json!({"model": "agent-model"});
        let cfg = registry()
            .resolve(&ProviderEntry::from("gemini"), agent.as_object().unwrap())
            .unwrap();
        assert_eq!(cfg.options.model, "agent-model");
        assert_eq!(cfg.options.temperature, None);
    }

    #[test]
    fn test_unknown_label_is_config_error() {
        let err = registry()
            .resolve(&ProviderEntry::from("nope"), &Map::new())
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_legacy_fallback_sequence() {
        let mut registry = registry();
        registry.set_fallback_provider(Some("gemini".into()));
        let labels: Vec<_> = registry
            .default_sequence()
            .iter()
            .map(|e| e.label().to_string())
            .collect();
        assert_eq!(labels, vec!["default", "gemini"]);
    }

    #[test]
    fn test_provider_config_deserializes_params() {
        let cfg: ProviderConfig = serde_json::from_value(json!({
            "driver": "openai",
            "model": "gpt-4o",
            "top_k": 4
        }))
        .unwrap();
        assert_eq!(cfg.params["top_k"], 4);
        assert!(cfg.api_key.is_none());
    }
}
