//! Gemini `generateContent` wire format
//!
//! Gemini takes instructions out of band (`systemInstruction`), names the
//! assistant role `model`, and returns tool results as `functionResponse`
//! parts inside a user turn.

use serde_json::{json, Map, Value};

use parley_core::formatter::{collect_instructions, MessageFormatter, SIGNATURE_EXTRA};
use parley_core::message::{Content, ContentPart, Message, MessageKind, Usage};
use parley_core::provider::FinishReason;
use parley_core::tool::{generate_call_id, ToolCall, ToolSchema};

#[derive(Clone, Copy, Debug, Default)]
pub struct GeminiFormatter;

/// Map a raw `finishReason` onto the shared vocabulary.
pub fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        None | Some("STOP" | "FINISH_REASON_UNSPECIFIED") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

/// `usageMetadata` as sent by the API, zero-filled when absent.
pub fn usage(metadata: &Value) -> Usage {
    let count = |key: &str| metadata[key].as_u64().and_then(|v| u32::try_from(v).ok());
    Usage::with_total(
        count("promptTokenCount").unwrap_or_default(),
        count("candidatesTokenCount").unwrap_or_default(),
        count("totalTokenCount"),
    )
}

/// Parts of the first candidate
pub fn parts(response: &Value) -> &[Value] {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Whether a part is model reasoning rather than answer text
pub fn is_thought(part: &Value) -> bool {
    part["thought"].as_bool().unwrap_or(false)
}

/// Tool call carried by a `functionCall` part
pub fn function_call(part: &Value) -> Option<ToolCall> {
    let call = part.get("functionCall")?;
    let name = call["name"].as_str()?;
    let id = call["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map_or_else(generate_call_id, String::from);
    let args = match &call["args"] {
        Value::Null => "{}".to_string(),
        args => args.to_string(),
    };

    let mut tool_call = ToolCall::new(id, name, args);
    if let Some(signature) = part["thoughtSignature"].as_str() {
        tool_call = tool_call.with_signature(signature);
    }
    Some(tool_call)
}

fn text_part(text: &str, signature: Option<&str>) -> Value {
    let mut part = json!({"text": text});
    if let Some(signature) = signature {
        part["thoughtSignature"] = json!(signature);
    }
    part
}

/// Best-effort MIME type from a URL's extension.
fn mime_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    match path.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "image/jpeg",
    }
}

fn image_part(url: &str) -> Value {
    // data:{mime};base64,{payload}
    if let Some((header, data)) = url.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        let mime = header.trim_end_matches(";base64");
        return json!({"inlineData": {"mimeType": mime, "data": data}});
    }
    json!({"fileData": {"mimeType": mime_from_url(url), "fileUri": url}})
}

fn content_parts(content: &Content) -> Vec<Value> {
    match content {
        Content::Text(text) => vec![text_part(text, None)],
        Content::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text_part(text, None),
                ContentPart::ImageUrl { image_url } => image_part(&image_url.url),
            })
            .collect(),
    }
}

impl MessageFormatter for GeminiFormatter {
    fn format_message(&self, message: &Message) -> Option<Value> {
        let signature = message.extras.get(SIGNATURE_EXTRA).and_then(Value::as_str);

        match &message.kind {
            MessageKind::System { .. } | MessageKind::Developer { .. } => None,
            MessageKind::User { content } => Some(json!({
                "role": "user",
                "parts": content_parts(content),
            })),
            MessageKind::Assistant { content } => Some(json!({
                "role": "model",
                "parts": [text_part(&content.as_text(), signature)],
            })),
            MessageKind::StreamedAssistant { content, .. } => Some(json!({
                "role": "model",
                "parts": [text_part(content, signature)],
            })),
            MessageKind::ToolCall { tool_calls } => {
                let parts: Vec<Value> = tool_calls
                    .iter()
                    .map(|call| {
                        let args = call
                            .arguments_map()
                            .map_or_else(|_| Value::Object(Map::new()), Value::Object);
                        let mut part = json!({"functionCall": {"name": call.name, "args": args}});
                        if let Some(signature) = &call.signature {
                            part["thoughtSignature"] = json!(signature);
                        }
                        part
                    })
                    .collect();
                Some(json!({"role": "model", "parts": parts}))
            }
            MessageKind::ToolResult {
                tool_name, content, ..
            } => Some(json!({
                "role": "user",
                "parts": [{
                    "functionResponse": {
                        "name": tool_name,
                        "response": {"content": content},
                    },
                }],
            })),
        }
    }

    /// Consecutive tool results share one user turn, matching the
    /// preceding model turn's function calls part for part.
    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        let mut contents: Vec<Value> = Vec::new();
        let mut previous_was_result = false;

        for message in messages {
            let Some(content) = self.format_message(message) else {
                continue;
            };
            let is_result = matches!(message.kind, MessageKind::ToolResult { .. });

            if is_result && previous_was_result {
                if let (Some(target), Some(parts)) = (
                    contents.last_mut().and_then(|c| c["parts"].as_array_mut()),
                    content["parts"].as_array(),
                ) {
                    target.extend(parts.iter().cloned());
                    continue;
                }
            }

            previous_was_result = is_result;
            contents.push(content);
        }
        contents
    }

    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
        if tools.is_empty() {
            return Vec::new();
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters_schema(),
                })
            })
            .collect();
        vec![json!({"functionDeclarations": declarations})]
    }

    fn extract_usage(&self, response: &Value) -> Usage {
        usage(&response["usageMetadata"])
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        parts(response).iter().filter_map(function_call).collect()
    }

    fn extract_content(&self, response: &Value) -> String {
        parts(response)
            .iter()
            .filter(|part| !is_thought(part))
            .filter_map(|part| part["text"].as_str())
            .collect()
    }

    fn extract_finish_reason(&self, response: &Value) -> FinishReason {
        if let Some(reason) = response["candidates"][0]["finishReason"].as_str() {
            return finish_reason(Some(reason));
        }
        // A blocked prompt comes back without candidates.
        match response["promptFeedback"]["blockReason"].as_str() {
            Some(block) => FinishReason::Other(block.to_string()),
            None => FinishReason::Stop,
        }
    }

    fn raw_finish_reason(&self, response: &Value) -> Option<String> {
        response["candidates"][0]["finishReason"]
            .as_str()
            .or_else(|| response["promptFeedback"]["blockReason"].as_str())
            .map(str::to_string)
    }

    fn has_tool_calls(&self, response: &Value) -> bool {
        parts(response).iter().any(|part| part.get("functionCall").is_some())
    }

    fn extract_system_instruction(&self, messages: &[Message]) -> Option<Value> {
        collect_instructions(messages).map(|text| json!({"parts": [{"text": text}]}))
    }

    fn extract_signature(&self, response: &Value) -> Option<String> {
        parts(response)
            .iter()
            .filter(|part| part.get("functionCall").is_none())
            .find_map(|part| part["thoughtSignature"].as_str())
            .map(String::from)
    }
}
