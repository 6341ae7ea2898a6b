//! One conversational turn against the current context.
//!
//! A turn appends the operator's message to the current context, then loops
//! between the model and the capability provider until the model stops:
//!
//! - `tool_calls`: run every requested tool in order, append the results, and
//!   ask the model again (a sub-turn; no new user message).
//! - `stop`: append the final assistant message and replace the current
//!   context with the working message list.
//! - `length` or anything else: fail the turn. Nothing beyond the user message
//!   is persisted.
//!
//! Streamed text is written to the caller's output as it arrives, so partial
//! output stays visible even when the turn later fails.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::completion::{ChatCompletion, Completion, CompletionEvent, FinishReason};
use super::context_store::ContextStore;
use super::message::Message;
use crate::error::{AgentError, SessionError};
use crate::session::{Features, ToolInfo};

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The cancellation token fired before the turn finished.
    Cancelled,
}

/// Drives turns for one shell session.
#[derive(Clone)]
pub struct Agent {
    completion: Arc<dyn ChatCompletion>,
    contexts: Arc<ContextStore>,
}

impl Agent {
    pub fn new(completion: Arc<dyn ChatCompletion>, contexts: Arc<ContextStore>) -> Self {
        Self {
            completion,
            contexts,
        }
    }

    /// Run one turn for `text`, streaming model output to `out`.
    pub async fn run_turn(
        &self,
        features: &Features,
        text: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        // -- Compose
        self.contexts.push_message(Message::user(text));
        let mut working = self.contexts.current_messages();
        let Some(tools) = cancel.run_until_cancelled(available_tools(features)).await else {
            tracing::info!("Turn cancelled while listing tools");
            return Ok(TurnOutcome::Cancelled);
        };
        let tools = tools?;
        tracing::debug!(
            messages = working.len(),
            tools = tools.len(),
            "Starting turn"
        );

        let mut tail = OutputTail::default();
        loop {
            // -- Stream
            let completion = match self.stream_once(&working, &tools, out, &mut tail, cancel).await {
                Ok(Some(completion)) => completion,
                Ok(None) => {
                    tracing::info!("Turn cancelled");
                    let _ = tail.finish(out).await;
                    return Ok(TurnOutcome::Cancelled);
                }
                Err(e) => {
                    // The stream error is what the operator needs to see.
                    let _ = tail.finish(out).await;
                    return Err(e);
                }
            };
            tail.finish(out).await?;

            // -- Dispatch on finish reason
            match completion.finish_reason {
                FinishReason::ToolCalls => {
                    let calls = completion.message.tool_calls().to_vec();
                    if calls.is_empty() {
                        return Err(AgentError::MissingToolCalls);
                    }
                    working.push(completion.message);
                    for call in calls {
                        tracing::info!(tool = %call.name, id = %call.id, "Calling tool");
                        let invocation = features.call_tool_json(&call.name, &call.arguments);
                        let Some(result) = cancel.run_until_cancelled(invocation).await else {
                            tracing::info!(tool = %call.name, "Turn cancelled during tool call");
                            return Ok(TurnOutcome::Cancelled);
                        };
                        let result = result.map_err(|source| AgentError::ToolInvocation {
                            name: call.name.clone(),
                            source,
                        })?;
                        working.push(Message::tool_result(call.id, result));
                    }
                }
                FinishReason::Stop => {
                    working.push(completion.message);
                    self.contexts.replace_current(working);
                    return Ok(TurnOutcome::Completed);
                }
                FinishReason::Length => return Err(AgentError::Truncated),
                FinishReason::Other(reason) => {
                    return Err(AgentError::UnexpectedFinishReason(reason));
                }
            }
        }
    }

    /// Open one completion and drain it. `Ok(None)` means cancelled.
    async fn stream_once(
        &self,
        messages: &[Message],
        tools: &[ToolInfo],
        out: &mut (dyn AsyncWrite + Send + Unpin),
        tail: &mut OutputTail,
        cancel: &CancellationToken,
    ) -> Result<Option<Completion>, AgentError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            opened = self.completion.stream(messages, tools) => opened?,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                event = stream.next() => event,
            };
            match event {
                Some(Ok(CompletionEvent::Delta(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    out.write_all(chunk.as_bytes()).await?;
                    out.flush().await?;
                    tail.record(&chunk);
                }
                Some(Ok(CompletionEvent::Finished(completion))) => return Ok(Some(completion)),
                Some(Err(e)) => return Err(e),
                None => return Err(AgentError::NoResponse),
            }
        }
    }
}

/// The provider's tool catalogue. Having no session means no tools.
async fn available_tools(features: &Features) -> Result<Vec<ToolInfo>, AgentError> {
    match features.list_tools().await {
        Ok(tools) => Ok(tools),
        Err(SessionError::NoSession) => Ok(Vec::new()),
        Err(e) => Err(AgentError::ToolListing(e)),
    }
}

/// Tracks whether streamed output ended mid-line.
#[derive(Debug, Default)]
struct OutputTail {
    open_line: bool,
}

impl OutputTail {
    fn record(&mut self, chunk: &str) {
        self.open_line = !chunk.ends_with('\n');
    }

    async fn finish(
        &mut self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        if self.open_line {
            out.write_all(b"\n").await?;
            out.flush().await?;
            self.open_line = false;
        }
        Ok(())
    }
}
