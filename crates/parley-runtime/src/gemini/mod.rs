//! Google Gemini driver (Generative Language API)

pub mod formatter;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde_json::{json, Map, Value};
use std::sync::Mutex;

use parley_core::config::EffectiveProviderConfig;
use parley_core::error::{AgentError, Result};
use parley_core::formatter::{build_response_message, MessageFormatter, SIGNATURE_EXTRA};
use parley_core::message::{Message, Usage};
use parley_core::provider::{FinishReason, GenerationOptions, LlmDriver, MessageStream};
use parley_core::tool::ToolCall;

use crate::http::{check_status, client, json_body, transport_error};
use crate::sse::data_frames;

pub use formatter::GeminiFormatter;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Driver for `models/{model}:generateContent`
pub struct GeminiDriver {
    label: String,
    client: Client,
    api_key: String,
    base_url: String,
    formatter: GeminiFormatter,
    last_response: Mutex<Option<Value>>,
}

impl GeminiDriver {
    pub fn new(config: &EffectiveProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AgentError::Config(format!("Provider '{}' requires an api_key", config.label))
            })?;
        let base_url = config
            .api_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            label: config.label.clone(),
            client: client(&config.extra)?,
            api_key,
            base_url,
            formatter: GeminiFormatter,
            last_response: Mutex::new(None),
        })
    }

    /// Raw body of the last non-streamed response
    pub fn last_response(&self) -> Option<Value> {
        self.last_response.lock().ok().and_then(|r| r.clone())
    }

    fn generation_config(options: &GenerationOptions) -> Map<String, Value> {
        let mut config = Map::new();
        if let Some(temperature) = options.temperature {
            config.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = options.top_p {
            config.insert("topP".into(), json!(top_p));
        }
        if let Some(top_k) = options.top_k {
            config.insert("topK".into(), json!(top_k));
        }
        if !options.stop_sequences.is_empty() {
            config.insert("stopSequences".into(), json!(options.stop_sequences));
        }
        if let Some(schema) = &options.response_schema {
            config.insert("responseMimeType".into(), json!("application/json"));
            config.insert("responseSchema".into(), schema.clone());
        }
        config
    }

    fn payload(&self, messages: &[Message], options: &GenerationOptions) -> Value {
        let mut body = json!({"contents": self.formatter.format_messages(messages)});

        if let Some(instruction) = self.formatter.extract_system_instruction(messages) {
            body["systemInstruction"] = instruction;
        }
        let generation = Self::generation_config(options);
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        let tools = self.formatter.format_tools(&options.tools);
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Response> {
        tracing::debug!(provider = %self.label, url = %url, "Sending generateContent request");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&self.label, &e))?;
        check_status(&self.label, response).await
    }
}

impl std::fmt::Debug for GeminiDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiDriver")
            .field("label", &self.label)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmDriver for GeminiDriver {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send_message(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Message> {
        let url = format!("{}/models/{}:generateContent", self.base_url, options.model);
        let body = self.payload(messages, options);
        let response = self.post(&url, &body).await?;
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
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, options.model
        );
        let body = self.payload(messages, options);
        let response = self.post(&url, &body).await?;
        let frames = data_frames(self.label.clone(), response);
        Ok(Box::pin(accumulate(self.label.clone(), frames)))
    }
}

/// Fold response chunks into streamed messages.
///
/// Function calls arrive whole inside a chunk; they are collected and
/// emitted as one tool-call message after the last chunk.
fn accumulate(
    provider: String,
    frames: impl Stream<Item = Result<Value>> + Send,
) -> impl Stream<Item = Result<Message>> + Send {
    async_stream::try_stream! {
        futures::pin_mut!(frames);

        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        let mut signature: Option<String> = None;
        let mut usage = Usage::default();
        let mut finish: Option<String> = None;

        while let Some(frame) = frames.next().await {
            let frame = frame?;

            if frame["usageMetadata"].is_object() {
                usage = formatter::usage(&frame["usageMetadata"]);
            }
            if let Some(reason) = frame["candidates"][0]["finishReason"].as_str() {
                finish = Some(reason.to_string());
            } else if let Some(block) = frame["promptFeedback"]["blockReason"].as_str() {
                finish = Some(block.to_string());
            }

            let mut delta = String::new();
            for part in formatter::parts(&frame) {
                if let Some(call) = formatter::function_call(part) {
                    calls.push(call);
                    continue;
                }
                if let Some(sig) = part["thoughtSignature"].as_str() {
                    signature = Some(sig.to_string());
                }
                if !formatter::is_thought(part) {
                    if let Some(chunk) = part["text"].as_str() {
                        delta.push_str(chunk);
                    }
                }
            }

            if !delta.is_empty() {
                text.push_str(&delta);
                yield Message::streamed(text.clone(), false);
            }
        }

        if !calls.is_empty() {
            tracing::debug!(provider = %provider, calls = calls.len(), "Stream requested tool calls");
            yield Message::tool_calls(calls).with_usage(usage);
        } else {
            match formatter::finish_reason(finish.as_deref()) {
                FinishReason::Stop => {
                    let mut message = Message::streamed(text, true).with_usage(usage);
                    if let Some(signature) = signature {
                        message = message.with_extra(SIGNATURE_EXTRA, Value::String(signature));
                    }
                    yield message;
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
