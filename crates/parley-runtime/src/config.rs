//! Runtime configuration
//!
//! A JSON document (or the process environment) describing providers, the
//! default provider sequence and the storage driver lists, turned into the
//! core's [`ProviderRegistry`] and [`StorageConfig`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{ProviderConfig, ProviderEntry, ProviderRegistry, StorageConfig};
use parley_core::error::{AgentError, Result};
use parley_core::reasoning::AgentBuilder;
use parley_core::storage::{InMemoryStorage, StorageDriver};

use crate::factory::DefaultDriverFactory;
use crate::storage::cache::DEFAULT_CAPACITY;
use crate::storage::{
    CacheStorage, FileStorage, NormalizedSqliteStorage, SessionStorage, SessionStore,
    SqliteStorage,
};

/// One storage driver in a driver list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverSpec {
    Memory,
    Cache {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capacity: Option<u64>,
    },
    /// Requires a [`SessionStore`] from the host
    Session,
    File {
        folder: PathBuf,
    },
    Sqlite {
        path: PathBuf,
    },
    SqliteNormalized {
        path: PathBuf,
    },
}

impl DriverSpec {
    pub fn build(&self, session: Option<&Arc<dyn SessionStore>>) -> Result<Arc<dyn StorageDriver>> {
        let driver: Arc<dyn StorageDriver> = match self {
            Self::Memory => Arc::new(InMemoryStorage::new()),
            Self::Cache { ttl_secs, capacity } => Arc::new(CacheStorage::new(
                capacity.unwrap_or(DEFAULT_CAPACITY),
                ttl_secs.map(Duration::from_secs),
            )),
            Self::Session => {
                let store = session.ok_or_else(|| {
                    AgentError::Config("session storage needs a session store".into())
                })?;
                Arc::new(SessionStorage::new(Arc::clone(store)))
            }
            Self::File { folder } => Arc::new(FileStorage::new(folder)),
            Self::Sqlite { path } => Arc::new(SqliteStorage::open(path)?),
            Self::SqliteNormalized { path } => Arc::new(NormalizedSqliteStorage::open(path)?),
        };
        Ok(driver)
    }
}

/// Driver lists for generic storages and chat history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageSpec {
    #[serde(default)]
    pub default: Vec<DriverSpec>,

    /// Falls back to `default` when empty
    #[serde(default)]
    pub history: Vec<DriverSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Provider label → configuration
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Label, list of labels, or `{label: overrides}` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sequence: Option<Value>,

    /// Deprecated: use `default_sequence`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,

    #[serde(default)]
    pub storage: StorageSpec,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AgentError::Config(format!("invalid runtime config: {e}")))
    }

    /// Load from environment variables (and `.env` when present).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let openai_key = var("OPENAI_API_KEY");
        let openai_url = var("OPENAI_BASE_URL");
        if openai_key.is_some() || openai_url.is_some() {
            let driver = if openai_key.is_some() { "openai" } else { "openai_compatible" };
            let mut provider = ProviderConfig::new("openai", driver);
            provider.api_key = openai_key;
            provider.api_url = openai_url;
            provider.model = var("OPENAI_MODEL");
            config.providers.insert("openai".into(), provider);
        }

        if let Some(key) = var("GEMINI_API_KEY") {
            let mut provider = ProviderConfig::new("gemini", "gemini").api_key(key);
            provider.model = var("GEMINI_MODEL");
            config.providers.insert("gemini".into(), provider);
        }

        config.default_sequence = match var("PARLEY_PROVIDERS") {
            Some(list) => Some(Value::Array(
                list.split(',')
                    .map(str::trim)
                    .filter(|label| !label.is_empty())
                    .map(|label| Value::String(label.to_string()))
                    .collect(),
            )),
            // First configured provider (OpenAI preferred), then the fallback
            None => ["openai", "gemini"]
                .into_iter()
                .find(|label| config.providers.contains_key(*label))
                .map(|primary| {
                    let mut labels = vec![Value::String(primary.to_string())];
                    if let Some(fallback) = var("PARLEY_FALLBACK_PROVIDER").filter(|f| f != primary) {
                        labels.push(Value::String(fallback));
                    }
                    Value::Array(labels)
                }),
        };
        config.fallback_provider = var("PARLEY_FALLBACK_PROVIDER");

        if let Some(dir) = var("PARLEY_STORAGE_DIR") {
            config.storage.default = vec![DriverSpec::File { folder: dir.into() }];
        }

        config
    }

    /// Provider registry with labels filled from the map keys.
    pub fn registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for (label, provider) in &self.providers {
            let mut provider = provider.clone();
            provider.label.clone_from(label);
            registry.register(provider);
        }

        if let Some(sequence) = &self.default_sequence {
            let entries = ProviderEntry::parse_sequence(sequence)?;
            if let Some(missing) = entries.iter().find(|e| registry.get(e.label()).is_none()) {
                return Err(AgentError::Config(format!(
                    "Default sequence names unknown provider '{}'",
                    missing.label()
                )));
            }
            registry.set_default_sequence(entries);
        }
        registry.set_fallback_provider(self.fallback_provider.clone());
        Ok(registry)
    }

    /// Storage driver lists; an empty list means one in-memory driver.
    pub fn storage_config(&self, session: Option<Arc<dyn SessionStore>>) -> Result<StorageConfig> {
        let build = |specs: &[DriverSpec]| -> Result<Vec<Arc<dyn StorageDriver>>> {
            specs.iter().map(|spec| spec.build(session.as_ref())).collect()
        };

        let mut default_drivers = build(&self.storage.default)?;
        if default_drivers.is_empty() {
            default_drivers = StorageConfig::default().default_drivers;
        }
        let history_drivers = if self.storage.history.is_empty() {
            default_drivers.clone()
        } else {
            build(&self.storage.history)?
        };

        tracing::debug!(
            default = ?self.storage.default,
            history = ?self.storage.history,
            "storage drivers configured"
        );
        Ok(StorageConfig::new(default_drivers, history_drivers))
    }

    /// Agent builder wired with this registry, storage, and the default
    /// driver factory.
    pub fn agent(&self, name: impl Into<String>) -> Result<AgentBuilder> {
        Ok(AgentBuilder::new(name)
            .registry(self.registry()?)
            .storage(self.storage_config(None)?)
            .driver_factory(Arc::new(DefaultDriverFactory)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_from_json() {
        let config = RuntimeConfig::from_json(
            r#"{
                "providers": {
                    "primary": {"driver": "openai", "model": "gpt-4o-mini", "api_key": "sk", "temperature": 0.2},
                    "backup": {"driver": "gemini", "api_key": "g"}
                },
                "default_sequence": ["primary", {"backup": {"temperature": 0.9}}],
                "storage": {
                    "default": [{"driver": "memory"}],
                    "history": [{"driver": "cache", "ttl_secs": 60}, {"driver": "memory"}]
                }
            }"#,
        )
        .unwrap();

        let registry = config.registry().unwrap();
        let sequence = registry.default_sequence();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[1].overrides().unwrap()["temperature"], json!(0.9));
        assert_eq!(registry.get("primary").unwrap().label, "primary");
        assert_eq!(registry.get("primary").unwrap().params["temperature"], json!(0.2));

        let storage = config.storage_config(None).unwrap();
        assert_eq!(storage.default_drivers.len(), 1);
        assert_eq!(storage.history_drivers[0].name(), "cache");
    }

    #[test]
    fn test_scalar_override_rejected() {
        let config = RuntimeConfig::from_json(
            r#"{"providers": {"p": {"driver": "openai"}}, "default_sequence": [{"p": 3}]}"#,
        )
        .unwrap();
        assert!(config.registry().unwrap_err().is_config());
    }

    #[test]
    fn test_unknown_sequence_label_rejected() {
        let config = RuntimeConfig::from_json(r#"{"default_sequence": "nope"}"#).unwrap();
        assert!(config.registry().is_err());
    }

    #[test]
    fn test_session_driver_needs_store() {
        let config = RuntimeConfig::from_json(r#"{"storage": {"default": [{"driver": "session"}]}}"#).unwrap();
        assert!(config.storage_config(None).is_err());
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
            ("GEMINI_API_KEY", "g"),
            ("PARLEY_PROVIDERS", "gemini, openai"),
            ("PARLEY_STORAGE_DIR", "/tmp/parley"),
        ]);
        let config = RuntimeConfig::from_vars(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.providers["openai"].driver, "openai_compatible");
        assert_eq!(config.default_sequence, Some(json!(["gemini", "openai"])));
        assert_eq!(
            config.storage.default,
            vec![DriverSpec::File { folder: "/tmp/parley".into() }]
        );
        assert_eq!(config.registry().unwrap().default_sequence()[0].label(), "gemini");
    }

    #[test]
    fn test_from_vars_fallback_follows_first_provider() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk"),
            ("GEMINI_API_KEY", "g"),
            ("PARLEY_FALLBACK_PROVIDER", "gemini"),
        ]);
        let config = RuntimeConfig::from_vars(|key| vars.get(key).map(ToString::to_string));

        let labels: Vec<String> = config
            .registry()
            .unwrap()
            .default_sequence()
            .iter()
            .map(|e| e.label().to_string())
            .collect();
        assert_eq!(labels, vec!["openai", "gemini"]);
    }

    #[test]
    fn test_legacy_fallback_provider() {
        let config = RuntimeConfig::from_json(
            r#"{"providers": {"default": {"driver": "openai"}, "spare": {"driver": "gemini"}},
                "fallback_provider": "spare"}"#,
        )
        .unwrap();
        let labels: Vec<String> = config
            .registry()
            .unwrap()
            .default_sequence()
            .iter()
            .map(|e| e.label().to_string())
            .collect();
        assert_eq!(labels, vec!["default", "spare"]);
    }
}
