//! Scripted drivers and helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use parley_core::storage::Records;
use parley_core::tool::ParameterSchema;
use parley_core::{
    AgentError, DriverFactory, EffectiveProviderConfig, FunctionTool, GenerationOptions,
    LlmDriver, Message, MessageKind, MessageStream, ProviderConfig, ProviderRegistry, Result,
    SessionIdentity, StorageDriver, ToolSchema,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Driver that either always fails or replays a fixed list of replies.
pub struct ScriptedDriver {
    name: String,
    failure: Option<String>,
    replies: Mutex<VecDeque<Message>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedDriver {
    pub fn failing(name: &str, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure: Some(reason.to_string()),
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(name: &str, replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure: None,
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Number of calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Messages sent with every call
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }

    fn next_reply(&self, messages: &[Message]) -> Result<Message> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if let Some(reason) = &self.failure {
            return Err(AgentError::unavailable(reason.clone()));
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Provider(format!("{} has no scripted reply left", self.name)))
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<Message> {
        self.next_reply(messages)
    }

    async fn send_message_streamed(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<MessageStream> {
        let reply = self.next_reply(messages)?;
        let items: Vec<Result<Message>> = match &reply.kind {
            MessageKind::Assistant { .. } => {
                let text = reply.text_content();
                let half = text.len() / 2;
                vec![
                    Ok(Message::streamed(&text[..half], false)),
                    Ok(Message::streamed(text, true)),
                ]
            }
            _ => vec![Ok(reply)],
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Factory handing out scripted drivers by provider label.
#[derive(Default)]
pub struct MockFactory {
    drivers: HashMap<String, Arc<ScriptedDriver>>,
    configs: Mutex<Vec<EffectiveProviderConfig>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: &str, driver: Arc<ScriptedDriver>) -> Self {
        self.drivers.insert(label.to_string(), driver);
        self
    }

    /// Every configuration a driver was requested for
    pub fn configs(&self) -> Vec<EffectiveProviderConfig> {
        self.configs.lock().unwrap().clone()
    }
}

impl DriverFactory for MockFactory {
    fn create(&self, config: &EffectiveProviderConfig) -> Result<Arc<dyn LlmDriver>> {
        self.configs.lock().unwrap().push(config.clone());
        match self.drivers.get(&config.label) {
            Some(driver) => Ok(driver.clone()),
            None => Err(AgentError::Config(format!("no driver for {}", config.label))),
        }
    }
}

/// Registry with one "mock" provider per label.
pub fn registry(labels: &[&str]) -> ProviderRegistry {
    labels.iter().fold(ProviderRegistry::new(), |registry, label| {
        registry.with_provider(ProviderConfig::new(*label, "mock"))
    })
}

/// `echo(input)` tool answering "Processed {input}"
pub fn echo_tool() -> FunctionTool {
    let schema = ToolSchema::new("echo", "Echo the input back")
        .parameter(ParameterSchema::new("input", "string", "Text to echo").required());
    FunctionTool::new(schema, |args| {
        let input = args.get("input").and_then(Value::as_str).unwrap_or_default();
        Ok(format!("Processed {input}"))
    })
}

/// Storage driver whose every call fails
pub struct FailingStorage;

#[async_trait]
impl StorageDriver for FailingStorage {
    fn name(&self) -> &str {
        "failing"
    }

    async fn read(&self, _identity: &SessionIdentity) -> Result<Option<Records>> {
        Err(AgentError::Storage("disk unplugged".into()))
    }

    async fn write(&self, _identity: &SessionIdentity, _records: &[Value]) -> Result<bool> {
        Err(AgentError::Storage("disk unplugged".into()))
    }

    async fn remove(&self, _identity: &SessionIdentity) -> Result<bool> {
        Err(AgentError::Storage("disk unplugged".into()))
    }
}
