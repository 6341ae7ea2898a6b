//! Streaming chat completion seam and its genai-backed implementation.
//!
//! The agent loop only sees [`CompletionEvent`]s: zero or more text deltas
//! followed by exactly one [`CompletionEvent::Finished`] carrying the full
//! assistant message and the reason generation stopped.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use genai::adapter::AdapterKind;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, StopReason, StreamEnd, Tool,
    ToolResponse,
};
use genai::resolver::{AuthData, Endpoint, ServiceTargetResolver};
use genai::{Client, ModelIden, ServiceTarget};
use serde_json::Value;

use super::message::{Message, ToolCall};
use crate::error::AgentError;
use crate::session::ToolInfo;

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    /// Map a provider's wire name onto a reason. Unknown names are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        Self::from(&StopReason::from(raw.to_string()))
    }
}

impl From<&StopReason> for FinishReason {
    fn from(reason: &StopReason) -> Self {
        match reason {
            StopReason::Completed(_) | StopReason::StopSequence(_) => FinishReason::Stop,
            StopReason::ToolCall(_) => FinishReason::ToolCalls,
            StopReason::MaxTokens(_) => FinishReason::Length,
            StopReason::ContentFilter(raw) | StopReason::Other(raw) => {
                FinishReason::Other(raw.clone())
            }
        }
    }
}

/// The terminal result of one completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub finish_reason: FinishReason,
    /// Always a [`Message::Assistant`].
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    Delta(String),
    Finished(Completion),
}

pub type CompletionStream = BoxStream<'static, Result<CompletionEvent, AgentError>>;

/// A streaming LLM.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Open a completion over the whole conversation, advertising `tools`.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<CompletionStream, AgentError>;
}

// ---------------------------------------------------------------------------
// genai
// ---------------------------------------------------------------------------

/// [`ChatCompletion`] backed by a `genai` client.
pub struct GenaiCompletion {
    client: Client,
    model: String,
    options: ChatOptions,
}

/// Overrides for where completion requests are sent.
#[derive(Debug, Clone, Default)]
pub struct LlmEndpoint {
    /// Base URL of an OpenAI-compatible API. Requests for every model go there.
    pub base_url: Option<String>,
    /// Key sent instead of the one genai would read from the environment.
    pub api_key: Option<String>,
}

impl GenaiCompletion {
    pub fn new(model: impl Into<String>, endpoint: LlmEndpoint) -> Self {
        let client = if endpoint.base_url.is_none() && endpoint.api_key.is_none() {
            Client::default()
        } else {
            Client::builder()
                .with_service_target_resolver(target_resolver(endpoint))
                .build()
        };
        Self {
            client,
            model: model.into(),
            options: ChatOptions::default()
                .with_capture_content(true)
                .with_capture_tool_calls(true),
        }
    }
}

fn target_resolver(overrides: LlmEndpoint) -> ServiceTargetResolver {
    let base_url = overrides.base_url.map(|url| normalize_base_url(&url));
    let api_key = overrides.api_key;
    ServiceTargetResolver::from_resolver_fn(
        move |target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
            let ServiceTarget {
                mut endpoint,
                mut auth,
                mut model,
            } = target;
            if let Some(url) = &base_url {
                endpoint = Endpoint::from_owned(url.clone());
                model = ModelIden::new(AdapterKind::OpenAI, model.model_name);
            }
            if let Some(key) = &api_key {
                auth = AuthData::from_single(key.clone());
            }
            Ok(ServiceTarget {
                endpoint,
                auth,
                model,
            })
        },
    )
}

/// genai joins request paths onto the base URL, so it must end in a slash.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

#[async_trait]
impl ChatCompletion for GenaiCompletion {
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<CompletionStream, AgentError> {
        let mut req = ChatRequest::new(to_chat_messages(messages));
        if !tools.is_empty() {
            req = req.with_tools(tools.iter().map(to_genai_tool).collect::<Vec<_>>());
        }

        let res = self
            .client
            .exec_chat_stream(&self.model, req, Some(&self.options))
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        // Forward chunks until End, then stop. A stream that ends without an
        // End event produced no usable response.
        let events = futures::stream::unfold(Some(res.stream), |state| async move {
            let mut stream = state?;
            loop {
                let item = match stream.next().await {
                    Some(Ok(ChatStreamEvent::Chunk(chunk))) => {
                        return Some((Ok(CompletionEvent::Delta(chunk.content)), Some(stream)));
                    }
                    Some(Ok(ChatStreamEvent::End(end))) => {
                        Ok(CompletionEvent::Finished(completion_from_end(&end)))
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Err(AgentError::Llm(e.to_string())),
                    None => Err(AgentError::NoResponse),
                };
                return Some((item, None));
            }
        });
        Ok(events.boxed())
    }
}

fn completion_from_end(end: &StreamEnd) -> Completion {
    let content = end
        .captured_texts()
        .filter(|texts| !texts.is_empty())
        .map(|texts| texts.concat());
    let tool_calls: Vec<ToolCall> = end
        .captured_tool_calls()
        .map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.call_id.clone(),
                    name: call.fn_name.clone(),
                    arguments: match &call.fn_arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    // Some providers report a plain stop alongside tool calls. Without a
    // captured reason, captured tool calls decide.
    let captured = end
        .captured_stop_reason
        .as_ref()
        .map(|reason| FinishReason::parse(reason.raw()));
    let finish_reason = match captured {
        Some(FinishReason::Stop) | None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        Some(reason) => reason,
        None => FinishReason::Stop,
    };
    Completion {
        finish_reason,
        message: Message::Assistant {
            content,
            tool_calls,
        },
    }
}

fn to_genai_tool(tool: &ToolInfo) -> Tool {
    let mut out = Tool::new(tool.name.clone()).with_schema(tool.input_schema.clone());
    if let Some(desc) = &tool.description {
        out = out.with_description(desc.clone());
    }
    out
}

fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg {
            Message::User { content } => out.push(ChatMessage::user(content.clone())),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    out.push(ChatMessage::assistant(text.to_string()));
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<genai::chat::ToolCall> = tool_calls
                        .iter()
                        .map(|call| genai::chat::ToolCall {
                            call_id: call.id.clone(),
                            fn_name: call.name.clone(),
                            fn_arguments: serde_json::from_str(&call.arguments)
                                .unwrap_or_else(|_| Value::String(call.arguments.clone())),
                            thought_signatures: None,
                        })
                        .collect();
                    out.push(ChatMessage::from(calls));
                }
            }
            Message::Tool {
                tool_call_id,
                content,
            } => out.push(ToolResponse::new(tool_call_id.clone(), content.clone()).into()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use genai::chat::{ChatRole, ContentPart, MessageContent};

    fn end_with(reason: Option<StopReason>, parts: Vec<ContentPart>) -> StreamEnd {
        StreamEnd {
            captured_stop_reason: reason,
            captured_content: Some(MessageContent::from_parts(parts)),
            ..Default::default()
        }
    }

    fn genai_call(name: &str) -> ContentPart {
        ContentPart::ToolCall(genai::chat::ToolCall {
            call_id: "c1".into(),
            fn_name: name.into(),
            fn_arguments: serde_json::json!({}),
            thought_signatures: None,
        })
    }

    #[test]
    fn finish_reason_maps_provider_names() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("tool_use"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("max_tokens"), FinishReason::Length);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::Other("content_filter".into())
        );
    }

    #[test]
    fn conversation_maps_onto_genai_roles() {
        let messages = vec![
            Message::user("list files"),
            Message::Assistant {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "ls".into(),
                    arguments: r#"{"path":"."}"#.into(),
                }],
            },
            Message::tool_result("c1", r#"{"content":[]}"#),
            Message::assistant("nothing there"),
        ];

        let roles: Vec<ChatRole> = to_chat_messages(&messages)
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::Tool,
                ChatRole::Assistant
            ]
        );
    }

    #[test]
    fn tool_call_arguments_survive_as_json() {
        let messages = vec![Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "ls".into(),
                arguments: r#"{"path":"/tmp"}"#.into(),
            }],
        }];
        let chat = to_chat_messages(&messages);
        let calls = chat[0].content.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].fn_arguments["path"], "/tmp");
    }

    #[test]
    fn captured_stop_reason_decides_finish() {
        let end = end_with(
            Some(StopReason::MaxTokens("length".into())),
            vec!["cut".into()],
        );
        let completion = completion_from_end(&end);
        assert_eq!(completion.finish_reason, FinishReason::Length);
        assert_eq!(completion.message, Message::assistant("cut"));

        let end = end_with(
            Some(StopReason::ContentFilter("content_filter".into())),
            vec!["partial".into()],
        );
        assert_eq!(
            completion_from_end(&end).finish_reason,
            FinishReason::Other("content_filter".into())
        );
    }

    #[test]
    fn plain_stop_with_tool_calls_is_a_tool_turn() {
        let end = end_with(Some(StopReason::Completed("STOP".into())), vec![genai_call("ls")]);
        let completion = completion_from_end(&end);
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
        let Message::Assistant { tool_calls, .. } = completion.message else {
            panic!("expected assistant message");
        };
        assert_eq!(tool_calls[0].name, "ls");
    }

    #[test]
    fn missing_stop_reason_falls_back_to_captured_calls() {
        assert_eq!(
            completion_from_end(&end_with(None, vec!["hi".into()])).finish_reason,
            FinishReason::Stop
        );
        assert_eq!(
            completion_from_end(&end_with(None, vec![genai_call("ls")])).finish_reason,
            FinishReason::ToolCalls
        );
    }

    #[test]
    fn every_text_part_is_kept() {
        let end = end_with(
            Some(StopReason::Completed("stop".into())),
            vec!["first ".into(), "second".into()],
        );
        assert_eq!(
            completion_from_end(&end).message,
            Message::assistant("first second")
        );

        let end = end_with(Some(StopReason::Completed("stop".into())), vec![]);
        let Message::Assistant { content, .. } = completion_from_end(&end).message else {
            panic!("expected assistant message");
        };
        assert_eq!(content, None);
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        assert_eq!(
            normalize_base_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/"
        );
        assert_eq!(normalize_base_url(" https://api.example/v1/ "), "https://api.example/v1/");
    }
}
