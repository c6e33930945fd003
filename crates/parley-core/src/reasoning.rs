//! Reasoning Loop
//!
//! Runs one conversation turn: send the history to the first provider in the
//! fallback sequence that answers, execute any requested tools, feed the
//! results back, and stop once the model replies with plain text.

use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderEntry, ProviderRegistry, StorageConfig, DEFAULT_PROVIDER};
use crate::context::Context;
use crate::error::{AgentError, Result};
use crate::events::{self, Event, Listener};
use crate::fallback::{FallbackSequencer, SequencerState};
use crate::message::Message;
use crate::provider::{
    with_callback, DriverFactory, GenerationOptions, LlmDriver, MessageStream, StreamCallback,
};
use crate::session::SessionIdentity;
use crate::storage::{ChatHistoryStorage, ManagedStorage, UsageStorage};
use crate::tool::{Tool, ToolCall, ToolRegistry};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Agent name, the first component of every storage key
    pub name: String,

    /// Instructions sent as a system message on every request (never stored)
    pub instructions: Option<String>,

    /// Maximum provider round trips per turn
    pub max_iterations: usize,

    /// Agent-level provider settings (model, temperature, ...)
    pub defaults: Map<String, Value>,

    /// Record token usage per provider response
    pub track_usage: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".into(),
            instructions: None,
            max_iterations: 10,
            defaults: Map::new(),
            track_usage: false,
        }
    }
}

/// Driver and options resolved for one sequence entry
#[derive(Clone)]
struct Attempt {
    label: String,
    driver: Arc<dyn LlmDriver>,
    options: GenerationOptions,
}

/// The main Agent struct
pub struct Agent {
    config: AgentConfig,
    registry: ProviderRegistry,
    factory: Arc<dyn DriverFactory>,
    tools: Arc<ToolRegistry>,
    sequencer: FallbackSequencer,
    attempts: HashMap<usize, Attempt>,
    context: Context,
    listener: Listener,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub const fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Label of the provider that answered the latest call, if any.
    pub fn active_provider(&self) -> Option<&str> {
        self.sequencer.active_provider()
    }

    pub fn chat_history(&mut self) -> Result<&mut ChatHistoryStorage> {
        self.context
            .get_mut::<ChatHistoryStorage>()
            .ok_or_else(|| AgentError::Storage("chat history is not registered".into()))
    }

    /// Stored messages of the current chat.
    pub async fn history(&mut self) -> Result<Vec<Message>> {
        Ok(self.chat_history()?.messages().await?.to_vec())
    }

    /// Empty the chat history and persist the empty state.
    pub async fn clear_history(&mut self) -> Result<()> {
        let history = self.chat_history()?;
        history.set_messages(Vec::new());
        history.save().await
    }

    pub async fn tracked_keys(&mut self) -> Result<Vec<String>> {
        self.context.tracked_keys().await
    }

    /// Run one turn and return the final assistant message.
    ///
    /// Every call starts again from the first provider of the sequence. A
    /// failed turn leaves the chat history as it was before the call.
    pub async fn respond(&mut self, input: impl Into<Message>) -> Result<Message> {
        self.sequencer.reset();
        let checkpoint = self.chat_history()?.len().await?;

        let result = self.run_turn(input.into()).await;
        if result.is_err() {
            self.rollback(checkpoint).await?;
        }
        result
    }

    async fn run_turn(&mut self, input: Message) -> Result<Message> {
        self.chat_history()?.add_message(input).await?;

        for iteration in 1..=self.config.max_iterations {
            let messages = self.outbound_messages().await?;
            let (reply, attempt) = self.dispatch(&messages).await?;
            self.track_usage(&attempt, &reply).await?;

            if reply.is_tool_call() {
                tracing::debug!(iteration, calls = reply.requested_tool_calls().len(), "tool calls requested");
                self.handle_tool_calls(reply).await?;
                continue;
            }

            self.chat_history()?.add_message(reply.clone()).await?;
            self.context.save().await?;
            return Ok(reply.into_settled());
        }

        Err(AgentError::MaxIterations(self.config.max_iterations))
    }

    /// Streamed variant of [`Agent::respond`].
    ///
    /// Yields every message the driver produces plus the tool results of
    /// each tool round. Fallback only applies while a stream is being opened;
    /// an error after the first chunk ends the stream and rolls the history
    /// back like [`Agent::respond`] does.
    pub fn respond_streamed(
        &mut self,
        input: impl Into<Message>,
        callback: Option<StreamCallback>,
    ) -> impl Stream<Item = Result<Message>> + Send + '_ {
        let input = input.into();
        async_stream::try_stream! {
            self.sequencer.reset();
            let checkpoint = self.chat_history()?.len().await?;

            let mut failure = None;
            {
                let turn = self.stream_turn(input, callback);
                futures::pin_mut!(turn);
                while let Some(item) = turn.next().await {
                    match item {
                        Ok(message) => {
                            yield message;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }

            if let Some(e) = failure {
                self.rollback(checkpoint).await?;
                Err(e)?;
            }
        }
    }

    fn stream_turn(
        &mut self,
        input: Message,
        callback: Option<StreamCallback>,
    ) -> impl Stream<Item = Result<Message>> + Send + '_ {
        async_stream::try_stream! {
            self.chat_history()?.add_message(input).await?;

            let mut finished = false;
            for _ in 0..self.config.max_iterations {
                let messages = self.outbound_messages().await?;
                let (stream, attempt) = self.open_stream(&messages).await?;
                let mut stream = with_callback(stream, callback.clone());

                let mut last = None;
                while let Some(item) = stream.next().await {
                    let message = item?;
                    yield message.clone();
                    last = Some(message);
                }
                let reply = last.ok_or_else(|| {
                    AgentError::Provider(format!("Provider '{}' returned an empty stream", attempt.label))
                })?;
                self.track_usage(&attempt, &reply).await?;

                if reply.is_tool_call() {
                    for result in self.handle_tool_calls(reply).await? {
                        yield result;
                    }
                    continue;
                }

                self.chat_history()?.add_message(reply).await?;
                self.context.save().await?;
                finished = true;
                break;
            }

            if !finished {
                Err(AgentError::MaxIterations(self.config.max_iterations))?;
            }
        }
    }

    /// Drop whatever a failed turn added to the chat history.
    async fn rollback(&mut self, checkpoint: usize) -> Result<()> {
        let history = self.chat_history()?;
        let mut messages = history.messages().await?.to_vec();
        if messages.len() > checkpoint {
            tracing::debug!(dropped = messages.len() - checkpoint, "rolling back failed turn");
            messages.truncate(checkpoint);
            history.set_messages(messages);
        }
        Ok(())
    }

    /// Instructions followed by the stored history.
    async fn outbound_messages(&mut self) -> Result<Vec<Message>> {
        let instructions = self.config.instructions.clone();
        let history = self.chat_history()?.messages().await?;

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(instructions) = instructions {
            messages.push(Message::system(instructions));
        }
        messages.extend_from_slice(history);
        Ok(messages)
    }

    /// Driver for the sequence entry at `index`, built on first use.
    fn attempt(&mut self, index: usize, entry: &ProviderEntry) -> Result<Attempt> {
        if let Some(attempt) = self.attempts.get(&index) {
            return Ok(attempt.clone());
        }

        let effective = self.registry.resolve(entry, &self.config.defaults)?;
        let driver = self.factory.create(&effective)?;
        let attempt = Attempt {
            label: effective.label,
            driver,
            options: effective.options.with_tools(self.tools.schemas()),
        };
        tracing::debug!(provider = %attempt.label, driver = attempt.driver.name(), model = %attempt.options.model, "driver created");
        self.attempts.insert(index, attempt.clone());
        Ok(attempt)
    }

    async fn dispatch(&mut self, messages: &[Message]) -> Result<(Message, Attempt)> {
        while let Some((index, entry)) = self.sequencer.current() {
            let entry = entry.clone();
            let result = match self.attempt(index, &entry) {
                Ok(attempt) => {
                    let reply = attempt.driver.send_message(messages, &attempt.options).await;
                    reply.map(|reply| (reply, attempt))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(done) => {
                    self.resolved(entry.label());
                    return Ok(done);
                }
                Err(e) => self.failed(entry.label(), e),
            }
        }
        Err(self.sequencer.take_error())
    }

    async fn open_stream(&mut self, messages: &[Message]) -> Result<(MessageStream, Attempt)> {
        while let Some((index, entry)) = self.sequencer.current() {
            let entry = entry.clone();
            let result = match self.attempt(index, &entry) {
                Ok(attempt) => {
                    let stream = attempt
                        .driver
                        .send_message_streamed(messages, &attempt.options)
                        .await;
                    stream.map(|stream| (stream, attempt))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(done) => {
                    self.resolved(entry.label());
                    return Ok(done);
                }
                Err(e) => self.failed(entry.label(), e),
            }
        }
        Err(self.sequencer.take_error())
    }

    fn resolved(&mut self, provider: &str) {
        if matches!(self.sequencer.state(), SequencerState::Pending(_)) {
            tracing::info!(provider = %provider, "provider resolved");
            self.listener.on_event(&Event::ProviderResolved {
                provider: provider.to_string(),
            });
        }
        self.sequencer.succeed();
    }

    fn failed(&mut self, provider: &str, error: AgentError) {
        tracing::warn!(provider = %provider, error = %error, "provider failed, trying next");
        self.listener.on_event(&Event::ProviderFailed {
            provider: provider.to_string(),
            error: error.to_string(),
        });
        self.sequencer.fail(error);
    }

    async fn track_usage(&mut self, attempt: &Attempt, reply: &Message) -> Result<()> {
        if !self.config.track_usage {
            return Ok(());
        }
        let Some(usage) = reply.usage else {
            return Ok(());
        };
        match self.context.get_mut::<UsageStorage>() {
            Some(storage) => {
                storage
                    .record(attempt.label.clone(), attempt.options.model.clone(), usage)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Store the tool-call message, run every call, store and return the results.
    async fn handle_tool_calls(&mut self, reply: Message) -> Result<Vec<Message>> {
        let calls = reply.requested_tool_calls().to_vec();
        self.chat_history()?.add_message(reply).await?;

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let result = self.execute_tool(call).await;
            self.chat_history()?.add_message(result.clone()).await?;
            results.push(result);
        }
        Ok(results)
    }

    /// Tool failures are reported back to the model instead of ending the turn.
    async fn execute_tool(&self, call: &ToolCall) -> Message {
        tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");
        let output = match self.tools.execute(call).await {
            Ok(result) if result.success => result.output,
            Ok(result) => format!("Error: {}", result.output),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool failed");
                format!("Error: {e}")
            }
        };
        Message::tool_result(&call.id, &call.name, output)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("sequence", &self.sequencer.entries())
            .field("tools", &self.tools.names())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Where the provider sequence comes from
#[derive(Clone, Debug)]
enum ProviderSource {
    /// The registry's default sequence
    Registry,
    /// Primary label plus the deprecated single fallback
    Legacy {
        primary: Option<String>,
        fallback: Option<String>,
    },
    Entries(Vec<ProviderEntry>),
    /// Loosely typed sequence, validated in `build`
    Raw(Value),
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    config: AgentConfig,
    providers: ProviderSource,
    registry: ProviderRegistry,
    factory: Option<Arc<dyn DriverFactory>>,
    tools: ToolRegistry,
    storage: StorageConfig,
    chat_name: Option<String>,
    user_id: Option<String>,
    group: Option<String>,
    store_meta: bool,
    listener: Listener,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: AgentConfig {
                name: name.into(),
                ..AgentConfig::default()
            },
            providers: ProviderSource::Registry,
            registry: ProviderRegistry::new(),
            factory: None,
            tools: ToolRegistry::new(),
            storage: StorageConfig::default(),
            chat_name: None,
            user_id: None,
            group: None,
            store_meta: false,
            listener: events::noop(),
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    /// Agent-level provider setting, overridden by provider configuration.
    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.defaults.insert(key.into(), value);
        self
    }

    pub fn model(self, model: impl Into<String>) -> Self {
        self.param("model", json!(model.into()))
    }

    pub fn temperature(self, temperature: f32) -> Self {
        self.param("temperature", json!(temperature))
    }

    pub fn max_tokens(self, max_tokens: u32) -> Self {
        self.param("max_tokens", json!(max_tokens))
    }

    pub fn top_p(self, top_p: f32) -> Self {
        self.param("top_p", json!(top_p))
    }

    pub fn top_k(self, top_k: u32) -> Self {
        self.param("top_k", json!(top_k))
    }

    pub fn response_schema(self, schema: Value) -> Self {
        self.param("response_schema", schema)
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Ordered provider sequence.
    pub fn providers(mut self, entries: Vec<ProviderEntry>) -> Self {
        self.providers = ProviderSource::Entries(entries);
        self
    }

    /// Sequence as JSON: a label, or a list of labels and `{label: overrides}`.
    pub fn providers_value(mut self, value: Value) -> Self {
        self.providers = ProviderSource::Raw(value);
        self
    }

    /// Single primary provider.
    pub fn provider(mut self, label: impl Into<String>) -> Self {
        let fallback = match self.providers {
            ProviderSource::Legacy { fallback, .. } => fallback,
            _ => None,
        };
        self.providers = ProviderSource::Legacy {
            primary: Some(label.into()),
            fallback,
        };
        self
    }

    /// Deprecated: use [`AgentBuilder::providers`].
    pub fn fallback_provider(mut self, label: impl Into<String>) -> Self {
        let primary = match self.providers {
            ProviderSource::Legacy { primary, .. } => primary,
            _ => None,
        };
        self.providers = ProviderSource::Legacy {
            primary,
            fallback: Some(label.into()),
        };
        self
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn chat(mut self, chat_name: impl Into<String>) -> Self {
        self.chat_name = Some(chat_name.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub const fn store_meta(mut self, store_meta: bool) -> Self {
        self.store_meta = store_meta;
        self
    }

    pub const fn track_usage(mut self, track_usage: bool) -> Self {
        self.config.track_usage = track_usage;
        self
    }

    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn listener(mut self, listener: Listener) -> Self {
        self.listener = listener;
        self
    }

    fn sequence(&self) -> Result<Vec<ProviderEntry>> {
        match &self.providers {
            ProviderSource::Registry => Ok(self.registry.default_sequence()),
            ProviderSource::Legacy { primary, fallback } => Ok(ProviderEntry::legacy_sequence(
                primary.clone().unwrap_or_else(|| DEFAULT_PROVIDER.into()),
                fallback
                    .clone()
                    .or_else(|| self.registry.fallback_provider().map(String::from)),
            )),
            ProviderSource::Entries(entries) => Ok(entries.clone()),
            ProviderSource::Raw(value) => ProviderEntry::parse_sequence(value),
        }
    }

    /// Validate the configuration and open the agent's storages.
    ///
    /// All configuration errors surface here, before any provider is called.
    pub async fn build(self) -> Result<Agent> {
        let sequence = self.sequence()?;
        for entry in &sequence {
            if self.registry.get(entry.label()).is_none() {
                return Err(AgentError::Config(format!(
                    "Provider '{}' is not configured",
                    entry.label()
                )));
            }
        }
        let sequencer = FallbackSequencer::new(sequence)?;

        let factory = self
            .factory
            .ok_or_else(|| AgentError::Config("A driver factory is required".into()))?;
        if self.config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        for schema in self.tools.schemas() {
            schema.validate()?;
        }

        let mut session = SessionIdentity::new(self.config.name.clone());
        if let Some(chat) = self.chat_name {
            session = session.with_chat(chat);
        }
        if let Some(user) = self.user_id {
            session = session.with_user(user);
        }
        if let Some(group) = self.group {
            session = session.with_group(group);
        }

        let mut context = Context::new(session, self.storage, self.listener.clone())?;
        context
            .make::<ChatHistoryStorage>(None)
            .await?
            .set_store_meta(self.store_meta);
        if self.config.track_usage {
            context.make::<UsageStorage>(None).await?;
        }

        tracing::info!(agent = %self.config.name, providers = sequencer.entries().len(), tools = self.tools.len(), "agent ready");

        Ok(Agent {
            config: self.config,
            registry: self.registry,
            factory,
            tools: Arc::new(self.tools),
            sequencer,
            attempts: HashMap::new(),
            context,
            listener: self.listener,
        })
    }
}
