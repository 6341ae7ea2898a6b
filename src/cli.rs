use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mcpsh",
    version,
    about = "Interactive shell for MCP servers with an optional tool-calling LLM"
)]
pub struct Cli {
    /// genai model name (e.g. "gpt-4o-mini", "claude-3-5-haiku-latest", "llama3.2").
    /// Without a model the `msg` and `ctx` commands are disabled.
    #[arg(short = 'M', long)]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API to send completions to.
    /// Requires a model.
    #[arg(short = 'L', long, value_name = "URL")]
    pub llm_base_url: Option<String>,

    /// API key for the LLM endpoint (otherwise read by genai from the provider's variable)
    #[arg(short = 'K', long, value_name = "KEY")]
    pub llm_api_key: Option<String>,

    /// Extra HTTP header for streamable HTTP servers, as "Name: value".
    /// "@path" reads one header per non-empty line of a file. Repeatable.
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Path to config file (overrides default search)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where conversation contexts are persisted
    #[arg(long)]
    pub context_file: Option<PathBuf>,

    /// Where line-editor history is persisted
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Log filter used when MCPSH_LOG is unset (e.g. "debug", "mcpsh=trace")
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Run one command line and exit instead of starting the REPL
    #[arg(short, long, value_name = "LINE")]
    pub exec: Option<String>,

    /// Server to connect to at startup: an http(s) URL, or a command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "SERVER")]
    pub server: Vec<String>,
}
