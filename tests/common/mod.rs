#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use mcpsh::agent::completion::CompletionStream;
use mcpsh::agent::{ChatCompletion, Completion, CompletionEvent, FinishReason, Message, ToolCall};
use mcpsh::error::{AgentError, SessionError};
use mcpsh::session::{
    CapabilityProvider, Connector, JsonObject, Page, PromptInfo, ToolInfo,
};
use mcpsh::shell::{Shell, ShellOptions};

// ─── Provider ─────────────────────────────────────────────────────────

/// In-memory provider with a fixed tool catalogue. Every call is recorded.
pub struct FakeProvider {
    pub tools: Vec<ToolInfo>,
    pub calls: Mutex<Vec<(String, JsonObject)>>,
    /// Tool names whose invocation fails.
    pub failing: Vec<String>,
    /// Tool names whose invocation never returns.
    pub hanging: Vec<String>,
}

impl FakeProvider {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|n| tool(n)).collect(),
            calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
            hanging: Vec::new(),
        }
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    pub fn hanging(mut self, name: &str) -> Self {
        self.hanging.push(name.to_string());
        self
    }

    pub fn recorded_calls(&self) -> Vec<(String, JsonObject)> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn tool(name: &str) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: Some(format!("The {name} tool")),
        input_schema: json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        }),
    }
}

#[async_trait]
impl CapabilityProvider for FakeProvider {
    fn target(&self) -> String {
        "fake-server".to_string()
    }

    fn server_name(&self) -> Option<String> {
        Some("fake".to_string())
    }

    async fn ping(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn list_tools_page(&self, _: Option<String>) -> Result<Page<ToolInfo>, SessionError> {
        Ok(Page {
            items: self.tools.clone(),
            next_cursor: None,
        })
    }

    async fn list_prompts_page(
        &self,
        _: Option<String>,
    ) -> Result<Page<PromptInfo>, SessionError> {
        Ok(Page {
            items: Vec::new(),
            next_cursor: None,
        })
    }

    async fn list_resources_page(&self, _: Option<String>) -> Result<Page<Value>, SessionError> {
        Ok(Page {
            items: Vec::new(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<Value, SessionError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if self.hanging.iter().any(|h| h == name) {
            return std::future::pending().await;
        }
        if self.failing.iter().any(|f| f == name) {
            return Err(SessionError::Request {
                operation: "call tool",
                message: "boom".to_string(),
            });
        }
        Ok(json!({
            "content": [{ "type": "text", "text": format!("{name} ran") }],
            "isError": false
        }))
    }

    async fn get_prompt(
        &self,
        name: &str,
        _: HashMap<String, String>,
    ) -> Result<Vec<Value>, SessionError> {
        Err(SessionError::Request {
            operation: "get prompt",
            message: format!("unknown prompt {name}"),
        })
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, SessionError> {
        Ok(vec![json!({ "uri": uri, "text": "contents" })])
    }

    async fn close(&self) {}
}

/// Connector that never reaches a server.
pub struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(
        &self,
        target: &str,
        _: &[String],
    ) -> Result<Arc<dyn CapabilityProvider>, SessionError> {
        Err(SessionError::Connect {
            target: target.to_string(),
            message: "unreachable".to_string(),
        })
    }
}

// ─── Completion ───────────────────────────────────────────────────────

/// One scripted reply to a completion request.
pub enum Step {
    /// Emit these events, then end the stream.
    Events(Vec<Result<CompletionEvent, AgentError>>),
    /// Emit one delta, cancel the token, then never finish.
    CancelMidStream(CancellationToken),
}

/// Completion that replays a queue of scripted replies and records what it
/// was asked.
#[derive(Default)]
pub struct ScriptedCompletion {
    steps: Mutex<VecDeque<Step>>,
    pub requests: Mutex<Vec<(Vec<Message>, Vec<String>)>>,
}

impl ScriptedCompletion {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Tool names advertised on the `n`th request.
    pub fn tools_seen(&self, n: usize) -> Vec<String> {
        self.requests.lock().unwrap()[n].1.clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedCompletion {
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<CompletionStream, AgentError> {
        self.requests.lock().unwrap().push((
            messages.to_vec(),
            tools.iter().map(|t| t.name.clone()).collect(),
        ));
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .expect("completion requested more times than scripted");
        match step {
            Step::Events(events) => Ok(stream::iter(events).boxed()),
            Step::CancelMidStream(token) => {
                let first = stream::once(async move {
                    token.cancel();
                    Ok(CompletionEvent::Delta("partial".to_string()))
                });
                Ok(first.chain(stream::pending()).boxed())
            }
        }
    }
}

pub fn finished(reason: FinishReason, message: Message) -> Result<CompletionEvent, AgentError> {
    Ok(CompletionEvent::Finished(Completion {
        finish_reason: reason,
        message,
    }))
}

/// A reply that streams `text` and stops.
pub fn say(text: &str) -> Step {
    Step::Events(vec![
        Ok(CompletionEvent::Delta(text.to_string())),
        finished(FinishReason::Stop, Message::assistant(text)),
    ])
}

/// A reply that requests one tool call.
pub fn call(id: &str, name: &str, arguments: &str) -> Step {
    Step::Events(vec![finished(
        FinishReason::ToolCalls,
        Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        },
    )])
}

// ─── Shell ────────────────────────────────────────────────────────────

pub fn shell_with(
    context_file: std::path::PathBuf,
    completion: Option<Arc<dyn ChatCompletion>>,
) -> Arc<Shell> {
    Arc::new(Shell::new(
        ShellOptions {
            context_file,
            model: completion.as_ref().map(|_| "scripted".to_string()),
        },
        Arc::new(FailingConnector),
        completion,
    ))
}
