//! Token usage ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;

use super::{ManagedStorage, Storage, StorageKind, StorageManager, StorageRecord};
use crate::error::Result;
use crate::events::Listener;
use crate::message::Usage;
use crate::session::SessionIdentity;

/// Usage reported by one provider response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, usage: Usage) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            recorded_at: Utc::now(),
        }
    }

    pub const fn usage(&self) -> Usage {
        Usage::with_total(self.prompt_tokens, self.completion_tokens, Some(self.total_tokens))
    }
}

impl StorageRecord for UsageRecord {
    fn to_record(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_record(record: Value) -> Result<Self> {
        Ok(serde_json::from_value(record)?)
    }
}

/// Append-only usage records for one session
#[derive(Debug)]
pub struct UsageStorage {
    inner: Storage<UsageRecord>,
}

impl UsageStorage {
    pub fn new(session: &SessionIdentity, manager: StorageManager, listener: Listener) -> Self {
        Self {
            inner: Storage::new(session.with_scope(Self::PREFIX), manager, listener),
        }
    }

    pub async fn record(
        &mut self,
        provider: impl Into<String> + Send,
        model: impl Into<String> + Send,
        usage: Usage,
    ) -> Result<()> {
        self.inner.push(UsageRecord::new(provider, model, usage)).await
    }

    pub async fn records(&mut self) -> Result<&[UsageRecord]> {
        self.inner.get().await
    }

    /// Sum over every record
    pub async fn totals(&mut self) -> Result<Usage> {
        Ok(self
            .inner
            .get()
            .await?
            .iter()
            .fold(Usage::default(), |acc, r| acc.add(r.usage())))
    }
}

#[async_trait]
impl ManagedStorage for UsageStorage {
    fn prefix(&self) -> &str {
        Self::PREFIX
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn identity(&self) -> &SessionIdentity {
        self.inner.identity()
    }

    async fn save(&mut self) -> Result<()> {
        self.inner.save().await
    }

    async fn read(&mut self) -> Result<()> {
        self.inner.read().await
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    async fn remove(&mut self) -> Result<()> {
        self.inner.remove().await;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl StorageKind for UsageStorage {
    const PREFIX: &'static str = "usage";
    const TYPE_NAME: &'static str = "UsageStorage";

    fn build(session: &SessionIdentity, manager: StorageManager, listener: Listener) -> Self {
        Self::new(session, manager, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::storage::InMemoryStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_totals_survive_reload() {
        let manager = StorageManager::new(vec![Arc::new(InMemoryStorage::new())]).unwrap();
        let session = SessionIdentity::new("bot");

        let mut usage = UsageStorage::new(&session, manager.clone(), events::noop());
        usage.record("p1", "m1", Usage::new(10, 5)).await.unwrap();
        usage.record("p2", "m2", Usage::new(1, 2)).await.unwrap();
        usage.save().await.unwrap();

        let mut reloaded = UsageStorage::new(&session, manager, events::noop());
        assert_eq!(reloaded.records().await.unwrap().len(), 2);
        assert_eq!(reloaded.totals().await.unwrap(), Usage::new(11, 7));
        assert_eq!(reloaded.identity().key(), "bot_default:usage");
    }
}
