use std::path::PathBuf;
use std::process::ExitStatus;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the capability provider session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session")]
    NoSession,

    #[error("connect {target}: {message}")]
    Connect { target: String, message: String },

    #[error("{operation}: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid header {header:?}: {message}")]
    InvalidHeader { header: String, message: String },
}

/// Errors raised by the conversation context store.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid context index: {0}")]
    InvalidIndex(usize),

    #[error("current context has no messages")]
    Empty,

    #[error("context store {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decode context store {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("encode context store: {0}")]
    Encode(serde_json::Error),
}

/// Errors raised while running one conversational turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("llm disabled")]
    Disabled,

    #[error("list tools: {0}")]
    ToolListing(SessionError),

    #[error("llm request failed: {0}")]
    Llm(String),

    #[error("no response from llm")]
    NoResponse,

    #[error("finish reason is tool_calls but the response carries no tool calls")]
    MissingToolCalls,

    #[error("call tool {name}: {source}")]
    ToolInvocation { name: String, source: SessionError },

    #[error("response truncated: the model hit its length limit")]
    Truncated,

    #[error("unexpected finish reason: {0}")]
    UnexpectedFinishReason(String),

    #[error("write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Errors surfaced by the command pipeline and its stages.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("invalid usage")]
    Usage,

    #[error("invalid pipeline: {0}")]
    PipelineSyntax(String),

    #[error("open {path}: {source}")]
    Redirect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stage {index}: {source}")]
    Stage {
        index: usize,
        source: Box<ShellError>,
    },

    #[error("{program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },

    #[error("call tool {name}: {source}")]
    ToolInvocation { name: String, source: SessionError },

    #[error("get prompt {name}: {source}")]
    PromptRetrieval { name: String, source: SessionError },

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// The error underneath any stage wrapping.
    pub fn root(&self) -> &ShellError {
        match self {
            ShellError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller should print command help instead of an error line.
    pub fn is_usage(&self) -> bool {
        matches!(self.root(), ShellError::Usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_usage_sees_through_stage_wrapping() {
        let err = ShellError::Stage {
            index: 2,
            source: Box::new(ShellError::Stage {
                index: 0,
                source: Box::new(ShellError::Usage),
            }),
        };
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "stage 2: stage 0: invalid usage");
    }

    #[test]
    fn session_errors_pass_through_transparently() {
        let err = ShellError::from(SessionError::NoSession);
        assert_eq!(err.to_string(), "no session");
        assert!(!err.is_usage());
    }
}
