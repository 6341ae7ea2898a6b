//! Conversation messages as stored in a context and sent to the model.
//!
//! The shell never rewrites a message once it is appended; contexts are only
//! extended or replaced wholesale at the end of a successful turn.

use serde::{Deserialize, Serialize};

/// A structured request from the model to invoke one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload exactly as the model produced it.
    pub arguments: String,
}

/// One role-tagged unit of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// Plain text content, if the message carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { .. } => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_role_tag() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn assistant_omits_empty_fields() {
        let msg = Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "ls".into(),
                arguments: "{}".into(),
            }],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["tool_calls"][0]["name"], "ls");
        assert_eq!(msg.text(), None);
    }

    #[test]
    fn tool_results_have_no_text() {
        let msg = Message::tool_result("c1", "{\"ok\":true}");
        assert_eq!(msg.text(), None);
        assert!(msg.tool_calls().is_empty());
    }
}
