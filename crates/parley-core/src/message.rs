//! Conversation Messages
//!
//! Standard message model shared by formatters, drivers, and storage.
//! Role-specific payloads live in [`MessageKind`]; attributes every message
//! carries (metadata, usage, provider extras) live on [`Message`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tool::ToolCall;

/// Role of a message sender, as providers see it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// Developer instructions (newer OpenAI models)
    Developer,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result (injected as context)
    Tool,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Usage whose total is the sum of prompt and completion tokens.
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Usage with a provider-reported total; falls back to the sum when absent.
    pub const fn with_total(prompt_tokens: u32, completion_tokens: u32, total: Option<u32>) -> Self {
        match total {
            Some(total_tokens) => Self {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            },
            None => Self::new(prompt_tokens, completion_tokens),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }

    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

/// Image reference inside a content part
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One typed part of a multi-part message body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message body: plain text or an ordered list of parts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenated text of all text parts.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentPart>> for Content {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// Role-specific payload of a message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    System {
        content: Content,
    },
    Developer {
        content: Content,
    },
    User {
        content: Content,
    },
    Assistant {
        content: Content,
    },
    /// Partial assistant text produced while streaming
    StreamedAssistant {
        content: String,
        #[serde(default)]
        complete: bool,
    },
    ToolCall {
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub kind: MessageKind,

    /// Opaque caller metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Token usage reported with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Provider-specific extras (e.g. thought signatures)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl Message {
    /// Create a new message
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            metadata: Map::new(),
            usage: None,
            extras: Map::new(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(MessageKind::System {
            content: content.into(),
        })
    }

    /// Create a developer message
    pub fn developer(content: impl Into<Content>) -> Self {
        Self::new(MessageKind::Developer {
            content: content.into(),
        })
    }

    /// Create a user message
    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(MessageKind::User {
            content: content.into(),
        })
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(MessageKind::Assistant {
            content: content.into(),
        })
    }

    /// Create a partial streamed assistant message
    pub fn streamed(content: impl Into<String>, complete: bool) -> Self {
        Self::new(MessageKind::StreamedAssistant {
            content: content.into(),
            complete,
        })
    }

    /// Create an assistant message requesting tool calls
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self::new(MessageKind::ToolCall { tool_calls })
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
        })
    }

    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Role as the provider sees it
    pub const fn role(&self) -> Role {
        match &self.kind {
            MessageKind::System { .. } => Role::System,
            MessageKind::Developer { .. } => Role::Developer,
            MessageKind::User { .. } => Role::User,
            MessageKind::Assistant { .. }
            | MessageKind::StreamedAssistant { .. }
            | MessageKind::ToolCall { .. } => Role::Assistant,
            MessageKind::ToolResult { .. } => Role::Tool,
        }
    }

    /// Plain text of the message body (empty for tool call requests)
    pub fn text_content(&self) -> String {
        match &self.kind {
            MessageKind::System { content }
            | MessageKind::Developer { content }
            | MessageKind::User { content }
            | MessageKind::Assistant { content } => content.as_text(),
            MessageKind::StreamedAssistant { content, .. }
            | MessageKind::ToolResult { content, .. } => content.clone(),
            MessageKind::ToolCall { .. } => String::new(),
        }
    }

    /// Tool calls requested by this message, if any
    pub fn requested_tool_calls(&self) -> &[ToolCall] {
        match &self.kind {
            MessageKind::ToolCall { tool_calls } => tool_calls,
            _ => &[],
        }
    }

    pub const fn is_tool_call(&self) -> bool {
        matches!(self.kind, MessageKind::ToolCall { .. })
    }

    pub const fn is_instruction(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::System { .. } | MessageKind::Developer { .. }
        )
    }

    /// Finished streamed text becomes a regular assistant message.
    #[must_use]
    pub fn into_settled(self) -> Self {
        match self.kind {
            MessageKind::StreamedAssistant { content, .. } => Self {
                kind: MessageKind::Assistant {
                    content: Content::Text(content),
                },
                ..self
            },
            kind => Self { kind, ..self },
        }
    }

    /// Flat record used by storage drivers
    pub fn to_record(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a message from a storage record
    pub fn from_record(record: Value) -> Result<Self> {
        Ok(serde_json::from_value(record)?)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::user(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::user(text)
    }
}

/// Ordered message collection with utility methods
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageArray {
    messages: Vec<Message>,
}

impl MessageArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.messages
    }

    /// Storage records, one per message
    pub fn to_records(&self) -> Result<Vec<Value>> {
        self.messages.iter().map(Message::to_record).collect()
    }

    pub fn from_records(records: Vec<Value>) -> Result<Self> {
        records.into_iter().map(Message::from_record).collect()
    }
}

impl From<Vec<Message>> for MessageArray {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for MessageArray {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}
