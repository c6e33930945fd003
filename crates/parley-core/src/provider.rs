//! LLM Driver Strategy Pattern
//!
//! Defines a common interface for all LLM drivers (OpenAI, Gemini, etc.)
//! allowing the agent to work with any backend without code changes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_core::provider::{GenerationOptions, LlmDriver};
//!
//! let driver = OpenAiDriver::new(config)?;
//! let reply = driver.send_message(&messages, &GenerationOptions::new("gpt-4o-mini")).await?;
//! ```

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::EffectiveProviderConfig;
use crate::error::Result;
use crate::message::Message;
use crate::tool::ToolSchema;

/// Model used when neither the agent nor the provider names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for LLM generation
///
/// Optional fields are only sent to the provider when set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini", "gemini-2.0-flash")
    pub model: String,

    /// Temperature for sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,

    /// JSON schema for structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,

    /// Whether the model may emit several tool calls in one turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Tools offered to the model
    #[serde(skip)]
    pub tools: Vec<ToolSchema>,
}

impl GenerationOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}

/// Reason for completion finishing, normalized across providers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Any other provider-specific reason, kept verbatim
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream of incremental messages; the last item is the settled message.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Observer invoked with every streamed message.
pub type StreamCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Strategy trait for LLM drivers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Driver name used in logs and errors
    fn name(&self) -> &str;

    /// One blocking round trip; returns an assistant or tool-call message.
    async fn send_message(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Message>;

    /// Open a streamed response. Dropping the stream stops further reads.
    async fn send_message_streamed(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<MessageStream>;
}

/// Builds the driver for one provider attempt.
///
/// A construction error counts as a failed attempt and moves the fallback
/// sequence on.
pub trait DriverFactory: Send + Sync {
    fn create(&self, config: &EffectiveProviderConfig) -> Result<Arc<dyn LlmDriver>>;
}

/// Invoke `callback` with every successfully produced message.
pub fn with_callback(stream: MessageStream, callback: Option<StreamCallback>) -> MessageStream {
    match callback {
        Some(callback) => Box::pin(stream.inspect(move |item| {
            if let Ok(message) = item {
                callback(message);
            }
        })),
        None => stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    #[test]
    fn test_unset_options_are_not_serialized() {
        let opts = GenerationOptions::new("gpt-4o-mini");
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(value, serde_json::json!({ "model": "gpt-4o-mini" }));
    }

    #[tokio::test]
    async fn test_callback_sees_each_message() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let source: MessageStream = Box::pin(stream::iter(vec![
            Ok(Message::streamed("He", false)),
            Ok(Message::streamed("Hello", true)),
        ]));

        let wrapped = with_callback(
            source,
            Some(Arc::new(move |m: &Message| {
                sink.lock().unwrap().push(m.text_content());
            })),
        );
        let collected: Vec<_> = wrapped.collect().await;

        assert_eq!(collected.len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["He", "Hello"]);
    }
}
