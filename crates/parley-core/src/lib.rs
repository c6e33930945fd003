//! # parley-core
//!
//! Provider-agnostic agent core: message model, tool system, provider
//! fallback and multi-backend session storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Agent                               │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌─────────────────────┐  │
//! │  │  Reasoning  │──│ FallbackSequencer│──│ LlmDriver (Strategy)│  │
//! │  │    Loop     │  └──────────────────┘  └─────────────────────┘  │
//! │  │             │  ┌──────────────────┐  ┌─────────────────────┐  │
//! │  │             │──│     Context      │──│ StorageManager      │  │
//! │  └─────────────┘  └──────────────────┘  │  ─► StorageDriver*  │  │
//! │                                          └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concrete drivers (HTTP providers, file and SQLite storage) live in
//! `parley-runtime`; this crate only defines the contracts and the
//! in-memory storage driver.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fallback;
pub mod formatter;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod storage;
pub mod tool;

pub use config::{EffectiveProviderConfig, ProviderConfig, ProviderEntry, ProviderRegistry, StorageConfig};
pub use context::Context;
pub use error::{AgentError, Result};
pub use events::{Event, EventListener, Listener, RecordingListener};
pub use fallback::{FallbackSequencer, SequencerState};
pub use formatter::MessageFormatter;
pub use message::{Content, Message, MessageArray, MessageKind, Role, Usage};
pub use provider::{DriverFactory, FinishReason, GenerationOptions, LlmDriver, MessageStream, StreamCallback};
pub use reasoning::{Agent, AgentBuilder, AgentConfig};
pub use session::{SessionIdentity, SessionIdentityArray};
pub use storage::{
    ChatHistoryStorage, IdentityStorage, InMemoryStorage, ManagedStorage, StorageDriver,
    StorageManager, UsageStorage,
};
pub use tool::{FunctionTool, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
