//! Conversation state and the tool-calling agent loop.

pub mod agent_loop;
pub mod completion;
pub mod context_store;
pub mod message;

pub use agent_loop::{Agent, TurnOutcome};
pub use completion::{
    ChatCompletion, Completion, CompletionEvent, FinishReason, GenaiCompletion, LlmEndpoint,
};
pub use context_store::{ContextInfo, ContextStore};
pub use message::{Message, ToolCall};
