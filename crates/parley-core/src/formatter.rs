//! Message Formatting
//!
//! Bidirectional translation between the shared message model and a
//! provider's wire JSON. One implementation per provider; callers only see
//! the [`MessageFormatter`] trait.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::{Message, Usage};
use crate::provider::FinishReason;
use crate::tool::{ToolCall, ToolSchema};

/// Extras key holding a provider signature for plain text responses.
pub const SIGNATURE_EXTRA: &str = "signature";

pub trait MessageFormatter: Send + Sync {
    /// Wire object for one message; `None` when the provider takes this role elsewhere.
    fn format_message(&self, message: &Message) -> Option<Value>;

    /// Wire objects for a conversation, skipping messages that format empty.
    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter_map(|m| self.format_message(m))
            .collect()
    }

    /// Provider tool declarations
    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value>;

    /// Token usage; zero-filled when the response carries none
    fn extract_usage(&self, response: &Value) -> Usage;

    /// Requested tool calls; ids are generated when the provider omits them
    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall>;

    /// Response text; empty when absent
    fn extract_content(&self, response: &Value) -> String;

    fn extract_finish_reason(&self, response: &Value) -> FinishReason;

    /// Finish reason exactly as the provider sent it
    fn raw_finish_reason(&self, _response: &Value) -> Option<String> {
        None
    }

    /// Checked independently of the finish reason, since some providers
    /// report `stop` for function-call responses.
    fn has_tool_calls(&self, response: &Value) -> bool;

    /// Provider-level system instruction built from System/Developer messages
    fn extract_system_instruction(&self, _messages: &[Message]) -> Option<Value> {
        None
    }

    /// Signature attached to a plain text response, if any
    fn extract_signature(&self, _response: &Value) -> Option<String> {
        None
    }
}

/// Texts of all System/Developer messages joined with newlines.
pub fn collect_instructions(messages: &[Message]) -> Option<String> {
    let texts: Vec<String> = messages
        .iter()
        .filter(|m| m.is_instruction())
        .map(Message::text_content)
        .filter(|t| !t.is_empty())
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

/// Turn a parsed provider response into the agent's next message.
///
/// Tool calls win over the finish reason; `stop` yields an assistant message;
/// every other terminal reason is an error carrying the raw reason.
pub fn build_response_message(
    provider: &str,
    formatter: &dyn MessageFormatter,
    response: &Value,
) -> Result<Message> {
    let usage = formatter.extract_usage(response);
    let finish_reason = formatter.extract_finish_reason(response);

    if finish_reason == FinishReason::ToolCalls || formatter.has_tool_calls(response) {
        let tool_calls = formatter.extract_tool_calls(response);
        if tool_calls.is_empty() {
            return Err(AgentError::Parse(format!(
                "{provider} reported tool calls but none could be parsed"
            )));
        }
        return Ok(Message::tool_calls(tool_calls).with_usage(usage));
    }

    match finish_reason {
        FinishReason::Stop => {
            let mut message =
                Message::assistant(formatter.extract_content(response)).with_usage(usage);
            if let Some(signature) = formatter.extract_signature(response) {
                message = message.with_extra(SIGNATURE_EXTRA, Value::String(signature));
            }
            Ok(message)
        }
        other => Err(AgentError::ProviderRefused {
            provider: provider.to_string(),
            reason: formatter
                .raw_finish_reason(response)
                .unwrap_or_else(|| other.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal formatter over a `{text, reason, calls, usage}` shape.
    struct FlatFormatter;

    impl MessageFormatter for FlatFormatter {
        fn format_message(&self, message: &Message) -> Option<Value> {
            (!message.is_instruction()).then(|| json!({ "text": message.text_content() }))
        }

        fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
            tools.iter().map(|t| json!(t.name)).collect()
        }

        fn extract_usage(&self, response: &Value) -> Usage {
            let n = response["usage"].as_u64().unwrap_or(0) as u32;
            Usage::new(n, n)
        }

        fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
            response["calls"]
                .as_array()
                .map(|calls| {
                    calls
                        .iter()
                        .map(|c| ToolCall::generated(c.as_str().unwrap_or_default(), "{}"))
                        .collect()
                })
                .unwrap_or_default()
        }

        fn extract_content(&self, response: &Value) -> String {
            response["text"].as_str().unwrap_or_default().to_string()
        }

        fn extract_finish_reason(&self, response: &Value) -> FinishReason {
            match response["reason"].as_str() {
                Some("stop") => FinishReason::Stop,
                Some(other) => FinishReason::Other(other.to_string()),
                None => FinishReason::Stop,
            }
        }

        fn has_tool_calls(&self, response: &Value) -> bool {
            response["calls"].as_array().is_some_and(|c| !c.is_empty())
        }
    }

    #[test]
    fn test_stop_builds_assistant_with_usage() {
        let msg =
            build_response_message("flat", &FlatFormatter, &json!({"text": "hi", "usage": 2}))
                .unwrap();
        assert_eq!(msg.text_content(), "hi");
        assert_eq!(msg.usage, Some(Usage::new(2, 2)));
    }

    #[test]
    fn test_tool_calls_win_over_stop() {
        let msg = build_response_message(
            "flat",
            &FlatFormatter,
            &json!({"reason": "stop", "calls": ["echo"]}),
        )
        .unwrap();
        assert!(msg.is_tool_call());
        assert_eq!(msg.requested_tool_calls()[0].name, "echo");
    }

    #[test]
    fn test_terminal_reason_is_an_error() {
        let err =
            build_response_message("flat", &FlatFormatter, &json!({"reason": "SAFETY"})).unwrap_err();
        assert!(matches!(err, AgentError::ProviderRefused { ref reason, .. } if reason == "SAFETY"));
    }

    #[test]
    fn test_format_messages_skips_instructions() {
        let formatted = FlatFormatter.format_messages(&[Message::system("s"), Message::user("u")]);
        assert_eq!(formatted, vec![json!({"text": "u"})]);
    }

    #[test]
    fn test_collect_instructions() {
        let messages = [
            Message::system("a"),
            Message::user("x"),
            Message::developer("b"),
        ];
        assert_eq!(collect_instructions(&messages).as_deref(), Some("a\nb"));
        assert_eq!(collect_instructions(&[Message::user("x")]), None);
    }
}
