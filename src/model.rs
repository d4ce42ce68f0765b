use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown by `display_content` when a response carried only tool calls.
const TOOL_ONLY_PLACEHOLDER: &str = "[assistant requested tool calls]";

/// Arguments of a reconstructed tool call. Concatenated fragments that parse
/// as JSON become `Json`; otherwise the raw string is preserved rather than
/// the call being dropped.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ToolArguments {
    Json(Value),
    Raw(String),
}

impl ToolArguments {
    pub fn from_concatenated(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(v) => Self::Json(v),
            Err(_) => Self::Raw(raw),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Raw(s) => Some(s.as_str()),
            Self::Json(_) => None,
        }
    }
}

/// A fully reassembled tool invocation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Token usage reported by the service, if any.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// The finalized result of one streamed (or blocking) completion.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl Completion {
    /// Displayable text for callers that require non-empty output: a
    /// tool-call-only response substitutes a fixed placeholder. This is a
    /// presentation convenience layered on top of the aggregate, which
    /// itself keeps `content` exactly as received.
    pub fn display_content(&self) -> &str {
        if self.content.is_empty() && !self.tool_calls.is_empty() {
            TOOL_ONLY_PLACEHOLDER
        } else {
            &self.content
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_parse_as_json_when_valid() {
        let args = ToolArguments::from_concatenated(r#"{"x":1}"#.into());
        assert_eq!(args.as_json(), Some(&serde_json::json!({"x":1})));
        assert_eq!(args.as_raw(), None);
    }

    #[test]
    fn arguments_keep_raw_string_when_unparseable() {
        let args = ToolArguments::from_concatenated("not-json".into());
        assert_eq!(args.as_raw(), Some("not-json"));
        assert_eq!(args.as_json(), None);
    }

    #[test]
    fn display_content_substitutes_placeholder_for_tool_only() {
        let completion = Completion {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "a".into(),
                name: "f".into(),
                arguments: ToolArguments::from_concatenated("{}".into()),
            }],
            finish_reason: Some("tool_calls".into()),
            usage: None,
        };
        assert_eq!(completion.display_content(), "[assistant requested tool calls]");
    }

    #[test]
    fn display_content_passes_text_through() {
        let completion = Completion {
            content: "Hello".into(),
            ..Completion::default()
        };
        assert_eq!(completion.display_content(), "Hello");

        let empty = Completion::default();
        assert_eq!(empty.display_content(), "");
    }

    #[test]
    fn completion_json_roundtrip() {
        let completion = Completion {
            content: "Hi".into(),
            tool_calls: vec![ToolCall {
                id: "call-1".into(),
                name: "lookup".into(),
                arguments: ToolArguments::Json(serde_json::json!({"q":"rust"})),
            }],
            finish_reason: Some("stop".into()),
            usage: Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 3,
            }),
        };
        let json = serde_json::to_string(&completion).unwrap();
        let de: Completion = serde_json::from_str(&json).unwrap();
        assert_eq!(completion, de);
    }
}
