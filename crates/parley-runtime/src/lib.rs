//! # parley-runtime
//!
//! Concrete backends for `parley-core`.
//!
//! ## Providers
//!
//! - **OpenAI**: Chat Completions, plus any OpenAI-compatible server
//! - **Gemini**: Generative Language API (`generateContent`)
//!
//! ## Storage
//!
//! - **cache**: in-process `moka` cache with optional TTL
//! - **session**: host-supplied web session
//! - **file**: one pretty-printed JSON file per key
//! - **sqlite** / **sqlite_normalized**: blob-per-key or row-per-record tables
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_runtime::{telemetry, RuntimeConfig};
//!
//! telemetry::init();
//! let config = RuntimeConfig::from_env();
//! let mut agent = config
//!     .agent("assistant")?
//!     .instructions("You are a helpful assistant.")
//!     .chat("support-42")
//!     .build()
//!     .await?;
//!
//! let reply = agent.respond("Hello!").await?;
//! ```

pub mod config;
pub mod factory;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod sse;
pub mod storage;
pub mod telemetry;

pub use config::{DriverSpec, RuntimeConfig, StorageSpec};
pub use factory::DefaultDriverFactory;
pub use gemini::{GeminiDriver, GeminiFormatter};
pub use openai::{OpenAiDriver, OpenAiFormatter};
pub use storage::{
    CacheStorage, Database, FileStorage, MemorySessionStore, NormalizedSqliteStorage,
    SessionStorage, SessionStore, SqliteStorage,
};

// Re-export core types for convenience
pub use parley_core::{
    Agent, AgentBuilder, AgentError, LlmDriver, Message, Result, Role, SessionIdentity,
    StorageDriver, Tool, ToolRegistry,
};
