use serde::Deserialize;
use std::path::PathBuf;

/// The TOML file structure for mcpsh.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub llm: Option<LlmConfig>,
    pub shell: Option<ShellConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    pub model: Option<String>,
    /// OpenAI-compatible endpoint used for every model.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShellConfig {
    pub context_file: Option<String>,
    pub history_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Connected at startup: a URL, or a command followed by its arguments.
    pub connect: Option<Vec<String>>,
    /// "Name: value" headers sent to streamable HTTP servers.
    pub headers: Option<Vec<String>>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `None` disables the agent.
    pub model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub context_file: PathBuf,
    pub history_file: PathBuf,
    /// Empty when no server should be connected at startup.
    pub server: Vec<String>,
    /// Header entries for HTTP servers, possibly `@file` references.
    pub headers: Vec<String>,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub context_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub server: Option<Vec<String>>,
    pub headers: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn to_partial(self) -> PartialConfig {
        let shell = self.shell;
        let (context_file, history_file) = match shell {
            Some(s) => (
                s.context_file.map(PathBuf::from),
                s.history_file.map(PathBuf::from),
            ),
            None => (None, None),
        };
        let (model, llm_base_url, llm_api_key) = match self.llm {
            Some(l) => (l.model, l.base_url, l.api_key),
            None => (None, None, None),
        };
        let (server, headers) = match self.server {
            Some(s) => (s.connect, s.headers),
            None => (None, None),
        };
        PartialConfig {
            model,
            llm_base_url,
            llm_api_key,
            context_file,
            history_file,
            server: server.filter(|words| !words.is_empty()),
            headers: headers.filter(|h| !h.is_empty()),
        }
    }
}
