//! OpenAI Chat Completions driver
//!
//! Also serves OpenAI-compatible servers (vLLM, LM Studio, Ollama's `/v1`),
//! which differ only in base URL and whether a key is required.

pub mod formatter;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

use parley_core::config::EffectiveProviderConfig;
use parley_core::error::{AgentError, Result};
use parley_core::formatter::{build_response_message, MessageFormatter};
use parley_core::message::{Message, Usage};
use parley_core::provider::{FinishReason, GenerationOptions, LlmDriver, MessageStream};
use parley_core::tool::{generate_call_id, ToolCall};

use crate::http::{check_status, client, json_body, transport_error};
use crate::sse::data_frames;

pub use formatter::OpenAiFormatter;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Driver for `POST {base}/chat/completions`
pub struct OpenAiDriver {
    label: String,
    client: Client,
    api_key: Option<String>,
    base_url: String,
    formatter: OpenAiFormatter,
    last_response: Mutex<Option<Value>>,
}

impl OpenAiDriver {
    /// Driver for api.openai.com; an API key is mandatory.
    pub fn new(config: &EffectiveProviderConfig) -> Result<Self> {
        if config.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(AgentError::Config(format!(
                "Provider '{}' requires an api_key",
                config.label
            )));
        }
        Self::compatible(config)
    }

    /// Driver for an OpenAI-compatible server; the key is optional.
    pub fn compatible(config: &EffectiveProviderConfig) -> Result<Self> {
        let base_url = config
            .api_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            label: config.label.clone(),
            client: client(&config.extra)?,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base_url,
            formatter: OpenAiFormatter,
            last_response: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Raw body of the last non-streamed response
    pub fn last_response(&self) -> Option<Value> {
        self.last_response.lock().ok().and_then(|r| r.clone())
    }

    fn payload(&self, messages: &[Message], options: &GenerationOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": self.formatter.format_messages(messages),
        });

        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if !options.stop_sequences.is_empty() {
            body["stop"] = json!(options.stop_sequences);
        }
        if !options.tools.is_empty() {
            body["tools"] = json!(self.formatter.format_tools(&options.tools));
            if let Some(parallel) = options.parallel_tool_calls {
                body["parallel_tool_calls"] = json!(parallel);
            }
        }
        if let Some(schema) = &options.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "response", "schema": schema},
            });
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<Response> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(provider = %self.label, url = %url, "Sending chat completion request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&self.label, &e))?;
        check_status(&self.label, response).await
    }
}

impl std::fmt::Debug for OpenAiDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiDriver")
            .field("label", &self.label)
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmDriver for OpenAiDriver {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send_message(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Message> {
        let body = self.payload(messages, options, false);
        let response = self.post(&body).await?;
        let response = json_body(&self.label, response).await?;

        if let Ok(mut last) = self.last_response.lock() {
            *last = Some(response.clone());
        }

        build_response_message(&self.label, &self.formatter, &response)
    }

    async fn send_message_streamed(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<MessageStream> {
        let body = self.payload(messages, options, true);
        let response = self.post(&body).await?;
        let frames = data_frames(self.label.clone(), response);
        Ok(Box::pin(accumulate(self.label.clone(), frames)))
    }
}

/// Tool call assembled from `delta.tool_calls` fragments
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn merge(&mut self, delta: &Value) {
        if let Some(id) = delta["id"].as_str() {
            self.id = id.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            self.name.push_str(name);
        }
        if let Some(arguments) = delta["function"]["arguments"].as_str() {
            self.arguments.push_str(arguments);
        }
    }

    fn finish(self) -> ToolCall {
        let id = if self.id.is_empty() {
            generate_call_id()
        } else {
            self.id
        };
        ToolCall::new(id, self.name, self.arguments)
    }
}

/// Fold chunk deltas into streamed messages.
///
/// Every text delta yields the accumulated text so far. The terminal message
/// is decided once the stream ends: tool calls win, otherwise the settled
/// text.
fn accumulate(
    provider: String,
    frames: impl Stream<Item = Result<Value>> + Send,
) -> impl Stream<Item = Result<Message>> + Send {
    async_stream::try_stream! {
        futures::pin_mut!(frames);

        let mut text = String::new();
        let mut calls: BTreeMap<u64, PartialCall> = BTreeMap::new();
        let mut usage = Usage::default();
        let mut finish: Option<String> = None;

        while let Some(frame) = frames.next().await {
            let frame = frame?;

            if frame["usage"].is_object() {
                usage = formatter::usage(&frame["usage"]);
            }

            let choice = &frame["choices"][0];
            if let Some(reason) = choice["finish_reason"].as_str() {
                finish = Some(reason.to_string());
            }

            let delta = &choice["delta"];
            if let Some(fragments) = delta["tool_calls"].as_array() {
                for fragment in fragments {
                    let index = fragment["index"].as_u64().unwrap_or_default();
                    calls.entry(index).or_default().merge(fragment);
                }
            }

            if let Some(content) = delta["content"].as_str() {
                if !content.is_empty() {
                    text.push_str(content);
                    yield Message::streamed(text.clone(), false);
                }
            }
        }

        if !calls.is_empty() {
            let tool_calls: Vec<ToolCall> = calls.into_values().map(PartialCall::finish).collect();
            tracing::debug!(provider = %provider, calls = tool_calls.len(), "Stream requested tool calls");
            yield Message::tool_calls(tool_calls).with_usage(usage);
        } else {
            match formatter::finish_reason(finish.as_deref()) {
                FinishReason::Stop => {
                    yield Message::streamed(text, true).with_usage(usage);
                }
                FinishReason::ToolCalls => {
                    Err(AgentError::Parse(format!(
                        "{provider} reported tool calls but streamed none"
                    )))?;
                }
                other => {
                    Err(AgentError::ProviderRefused {
                        provider: provider.clone(),
                        reason: finish.clone().unwrap_or_else(|| other.to_string()),
                    })?;
                }
            }
        }
    }
}
