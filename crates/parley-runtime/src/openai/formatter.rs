//! OpenAI Chat Completions wire format

use serde_json::{json, Value};

use parley_core::formatter::MessageFormatter;
use parley_core::message::{Content, Message, MessageKind, Usage};
use parley_core::provider::FinishReason;
use parley_core::tool::{generate_call_id, ToolCall, ToolSchema};

#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiFormatter;

impl OpenAiFormatter {
    fn content(content: &Content) -> Value {
        match content {
            Content::Text(text) => json!(text),
            Content::Parts(parts) => json!(parts),
        }
    }

    fn message<'a>(response: &'a Value) -> &'a Value {
        &response["choices"][0]["message"]
    }
}

/// Map a raw `finish_reason` onto the shared vocabulary.
pub fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        None | Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls" | "function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

/// Usage object as sent by the API, zero-filled when absent.
pub fn usage(value: &Value) -> Usage {
    let count = |key: &str| {
        value[key]
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
    };
    Usage::with_total(
        count("prompt_tokens").unwrap_or_default(),
        count("completion_tokens").unwrap_or_default(),
        count("total_tokens"),
    )
}

/// Arguments arrive as a JSON string; some compatible servers send an object.
fn arguments(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl MessageFormatter for OpenAiFormatter {
    fn format_message(&self, message: &Message) -> Option<Value> {
        let value = match &message.kind {
            MessageKind::System { content } => json!({
                "role": "system",
                "content": Self::content(content),
            }),
            MessageKind::Developer { content } => json!({
                "role": "developer",
                "content": Self::content(content),
            }),
            MessageKind::User { content } => json!({
                "role": "user",
                "content": Self::content(content),
            }),
            MessageKind::Assistant { content } => json!({
                "role": "assistant",
                "content": Self::content(content),
            }),
            MessageKind::StreamedAssistant { content, .. } => json!({
                "role": "assistant",
                "content": content,
            }),
            MessageKind::ToolCall { tool_calls } => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": tool_calls
                    .iter()
                    .map(|call| json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments,
                        },
                    }))
                    .collect::<Vec<_>>(),
            }),
            MessageKind::ToolResult {
                tool_call_id,
                content,
                ..
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        };
        Some(value)
    }

    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters_schema(),
                    },
                })
            })
            .collect()
    }

    fn extract_usage(&self, response: &Value) -> Usage {
        usage(&response["usage"])
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        let Some(calls) = Self::message(response)["tool_calls"].as_array() else {
            return Vec::new();
        };
        calls
            .iter()
            .filter_map(|call| {
                let function = &call["function"];
                let name = function["name"].as_str()?;
                let id = call["id"]
                    .as_str()
                    .filter(|id| !id.is_empty())
                    .map_or_else(generate_call_id, String::from);
                Some(ToolCall::new(id, name, arguments(&function["arguments"])))
            })
            .collect()
    }

    fn extract_content(&self, response: &Value) -> String {
        Self::message(response)["content"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    fn extract_finish_reason(&self, response: &Value) -> FinishReason {
        finish_reason(response["choices"][0]["finish_reason"].as_str())
    }

    fn raw_finish_reason(&self, response: &Value) -> Option<String> {
        response["choices"][0]["finish_reason"].as_str().map(str::to_string)
    }

    fn has_tool_calls(&self, response: &Value) -> bool {
        Self::message(response)["tool_calls"]
            .as_array()
            .is_some_and(|calls| !calls.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::formatter::build_response_message;
    use parley_core::tool::ParameterSchema;

    #[test]
    fn test_format_conversation() {
        let call = ToolCall::new("call_1", "echo", r#"{"input":"x"}"#);
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::tool_calls(vec![call]),
            Message::tool_result("call_1", "echo", "Processed x"),
        ];
        let wire = OpenAiFormatter.format_messages(&messages);

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], r#"{"input":"x"}"#);
        assert_eq!(
            wire[3],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "Processed x"})
        );
    }

    #[test]
    fn test_format_tools() {
        let schema = ToolSchema::new("echo", "Echo")
            .parameter(ParameterSchema::new("input", "string", "Text").required());
        let tools = OpenAiFormatter.format_tools(&[schema]);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["parameters"]["type"], "object");
        assert_eq!(tools[0]["function"]["parameters"]["required"], json!(["input"]));
    }

    #[test]
    fn test_tool_call_response() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "type": "function",
                        "function": {"name": "echo", "arguments": "{\"input\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        });

        let message = build_response_message("openai", &OpenAiFormatter, &response).unwrap();
        let calls = message.requested_tool_calls();
        assert_eq!(calls[0].name, "echo");
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(message.usage, Some(Usage::new(5, 3)));
    }

    #[test]
    fn test_refusal_keeps_raw_reason() {
        let response = json!({
            "choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]
        });
        let err = build_response_message("openai", &OpenAiFormatter, &response).unwrap_err();
        assert!(err.to_string().contains("content_filter"));
    }

    #[test]
    fn test_missing_usage_is_zero() {
        assert!(OpenAiFormatter.extract_usage(&json!({})).is_empty());
        assert_eq!(OpenAiFormatter.extract_content(&json!({})), "");
    }
}
