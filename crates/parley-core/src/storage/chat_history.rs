//! Chat history storage

use async_trait::async_trait;
use std::any::Any;

use super::{ManagedStorage, Storage, StorageKind, StorageManager};
use crate::error::Result;
use crate::events::Listener;
use crate::message::Message;
use crate::session::SessionIdentity;

/// Ordered messages of one chat.
///
/// Message metadata is dropped on save unless `store_meta` is set; usage is
/// always kept.
#[derive(Debug)]
pub struct ChatHistoryStorage {
    inner: Storage<Message>,
    store_meta: bool,
}

impl ChatHistoryStorage {
    pub fn new(session: &SessionIdentity, manager: StorageManager, listener: Listener) -> Self {
        Self {
            inner: Storage::new(session.with_scope(Self::PREFIX), manager, listener),
            store_meta: false,
        }
    }

    #[must_use]
    pub const fn with_store_meta(mut self, store_meta: bool) -> Self {
        self.store_meta = store_meta;
        self
    }

    pub fn set_store_meta(&mut self, store_meta: bool) {
        self.store_meta = store_meta;
    }

    pub const fn store_meta(&self) -> bool {
        self.store_meta
    }

    /// Append a message; streamed text is stored as a plain assistant message.
    pub async fn add_message(&mut self, message: Message) -> Result<()> {
        self.inner.push(message.into_settled()).await
    }

    pub async fn messages(&mut self) -> Result<&[Message]> {
        self.inner.get().await
    }

    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.inner.set(messages);
    }

    pub async fn last_message(&mut self) -> Result<Option<&Message>> {
        Ok(self.inner.get().await?.last())
    }

    pub async fn len(&mut self) -> Result<usize> {
        Ok(self.inner.get().await?.len())
    }

    pub const fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    pub const fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }
}

#[async_trait]
impl ManagedStorage for ChatHistoryStorage {
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
        let store_meta = self.store_meta;
        self.inner
            .save_with(move |message| {
                let mut record = message.to_record()?;
                if !store_meta {
                    if let Some(fields) = record.as_object_mut() {
                        fields.remove("metadata");
                    }
                }
                Ok(record)
            })
            .await
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

impl StorageKind for ChatHistoryStorage {
    const PREFIX: &'static str = "chatHistory";
    const TYPE_NAME: &'static str = "ChatHistoryStorage";
    const USES_HISTORY_DRIVERS: bool = true;

    fn build(session: &SessionIdentity, manager: StorageManager, listener: Listener) -> Self {
        Self::new(session, manager, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::message::{MessageKind, Usage};
    use crate::storage::{InMemoryStorage, StorageDriver};
    use serde_json::json;
    use std::sync::Arc;

    fn history(driver: Arc<InMemoryStorage>) -> ChatHistoryStorage {
        let manager = StorageManager::new(vec![driver]).unwrap();
        ChatHistoryStorage::new(&SessionIdentity::new("bot").with_chat("c1"), manager, events::noop())
    }

    #[test]
    fn test_key_is_scoped() {
        let h = history(Arc::new(InMemoryStorage::new()));
        assert_eq!(h.identity().key(), "bot_c1:chatHistory");
    }

    #[tokio::test]
    async fn test_last_message() {
        let mut h = history(Arc::new(InMemoryStorage::new()));
        assert!(h.last_message().await.unwrap().is_none());

        h.add_message(Message::user("one")).await.unwrap();
        h.add_message(Message::streamed("two", true)).await.unwrap();
        let last = h.last_message().await.unwrap().unwrap();
        assert!(matches!(last.kind, MessageKind::Assistant { .. }));
        assert_eq!(last.text_content(), "two");
    }

    #[tokio::test]
    async fn test_metadata_dropped_but_usage_kept() {
        let driver = Arc::new(InMemoryStorage::new());
        let mut h = history(driver.clone());
        h.add_message(
            Message::assistant("hi")
                .with_metadata("trace", json!("abc"))
                .with_usage(Usage::new(3, 4)),
        )
        .await
        .unwrap();
        h.save().await.unwrap();

        let records = driver.read(h.identity()).await.unwrap().unwrap();
        assert!(records[0].get("metadata").is_none());
        assert_eq!(records[0]["usage"]["total_tokens"], 7);

        let mut reloaded = history(driver);
        let message = reloaded.last_message().await.unwrap().unwrap();
        assert_eq!(message.usage, Some(Usage::new(3, 4)));
        assert!(message.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_store_meta_keeps_metadata() {
        let driver = Arc::new(InMemoryStorage::new());
        let mut h = history(driver.clone()).with_store_meta(true);
        h.add_message(Message::user("hi").with_metadata("trace", json!("abc")))
            .await
            .unwrap();
        h.save().await.unwrap();

        let records = driver.read(h.identity()).await.unwrap().unwrap();
        assert_eq!(records[0]["metadata"]["trace"], "abc");
    }
}
