//! MCP-backed capability provider built on the `rmcp` client.
//!
//! Targets starting with `http://` or `https://` use the streamable HTTP
//! transport. Anything else is treated as a command line for a stdio child
//! process, optionally prefixed with `stdio://`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParam, ClientCapabilities, ClientInfo, ClientRequest, GetPromptRequestParam,
    Implementation, PaginatedRequestParam, ProtocolVersion, ReadResourceRequestParam,
    RequestNoParam,
};
use rmcp::service::{Peer, RunningService};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{ClientHandler, RoleClient};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    CapabilityProvider, Connector, JsonObject, Page, PromptArgumentInfo, PromptInfo, ToolInfo,
};
use crate::error::SessionError;

const STDIO_PREFIX: &str = "stdio://";

// ---------------------------------------------------------------------------
// Client handler
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ShellClient {
    info: ClientInfo,
}

impl ShellClient {
    fn new() -> Self {
        Self {
            info: ClientInfo {
                protocol_version: ProtocolVersion::LATEST,
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    title: None,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    icons: None,
                    website_url: None,
                },
            },
        }
    }
}

impl ClientHandler for ShellClient {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens MCP sessions over stdio or streamable HTTP.
#[derive(Debug, Default, Clone)]
pub struct McpConnector {
    /// Sent with every request to HTTP servers.
    headers: HeaderMap,
}

impl McpConnector {
    /// Connector whose HTTP sessions send `entries` as extra headers. An entry is
    /// "Name: value", or "@path" naming a file with one header per line.
    pub fn with_headers(entries: &[String]) -> Result<Self, SessionError> {
        let mut headers = HeaderMap::new();
        for entry in entries {
            for line in expand_header_entry(entry)? {
                let (name, value) = parse_header(&line)?;
                headers.append(name, value);
            }
        }
        tracing::debug!(count = headers.len(), "HTTP headers configured");
        Ok(Self { headers })
    }

    fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .default_headers(self.headers.clone())
            .build()
    }
}

/// Expand an `@file` entry into its non-empty lines.
fn expand_header_entry(entry: &str) -> Result<Vec<String>, SessionError> {
    let Some(path) = entry.strip_prefix('@') else {
        return Ok(vec![entry.to_string()]);
    };
    let contents = std::fs::read_to_string(path).map_err(|e| SessionError::InvalidHeader {
        header: entry.to_string(),
        message: format!("read header file: {e}"),
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn parse_header(line: &str) -> Result<(HeaderName, HeaderValue), SessionError> {
    let invalid = |message: String| SessionError::InvalidHeader {
        header: line.to_string(),
        message,
    };
    let Some((name, value)) = line.split_once(':') else {
        return Err(invalid("expected \"Name: value\"".to_string()));
    };
    let name = HeaderName::from_str(name.trim()).map_err(|e| invalid(e.to_string()))?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| invalid(e.to_string()))?;
    Ok((name, value))
}

/// How a connect target is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Http(String),
    Stdio { program: String, args: Vec<String> },
}

impl Endpoint {
    /// Classify `target` plus any extra words typed after it.
    pub fn parse(target: &str, extra: &[String]) -> Result<Self, SessionError> {
        if target.starts_with("http://") || target.starts_with("https://") {
            if !extra.is_empty() {
                return Err(SessionError::Connect {
                    target: target.to_string(),
                    message: "http targets take no extra arguments".to_string(),
                });
            }
            return Ok(Endpoint::Http(target.to_string()));
        }

        let command = target.strip_prefix(STDIO_PREFIX).unwrap_or(target);
        let mut words = shell_words::split(command).map_err(|e| SessionError::Connect {
            target: target.to_string(),
            message: e.to_string(),
        })?;
        words.extend(extra.iter().cloned());
        if words.is_empty() {
            return Err(SessionError::Connect {
                target: target.to_string(),
                message: "empty command".to_string(),
            });
        }
        let program = words.remove(0);
        Ok(Endpoint::Stdio {
            program,
            args: words,
        })
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        target: &str,
        args: &[String],
    ) -> Result<Arc<dyn CapabilityProvider>, SessionError> {
        let endpoint = Endpoint::parse(target, args)?;
        let connect_err = |message: String| SessionError::Connect {
            target: target.to_string(),
            message,
        };

        tracing::info!(?endpoint, "Connecting to capability provider");
        let service = match endpoint {
            Endpoint::Http(url) => {
                let client = self
                    .http_client()
                    .map_err(|e| connect_err(e.to_string()))?;
                let transport = StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(url),
                );
                rmcp::serve_client(ShellClient::new(), transport)
                    .await
                    .map_err(|e| connect_err(e.to_string()))?
            }
            Endpoint::Stdio { program, args } => {
                let mut cmd = tokio::process::Command::new(&program);
                cmd.args(&args);
                let transport =
                    TokioChildProcess::new(cmd).map_err(|e| connect_err(format!("{program}: {e}")))?;
                rmcp::serve_client(ShellClient::new(), transport)
                    .await
                    .map_err(|e| connect_err(e.to_string()))?
            }
        };

        let display = shell_words::join(std::iter::once(target).chain(args.iter().map(String::as_str)));
        let session = McpSession::new(display, service);
        tracing::info!(server = ?session.server_name(), "Connected");
        Ok(Arc::new(session))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A running MCP client session.
pub struct McpSession {
    target: String,
    server_name: Option<String>,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ShellClient>>>,
}

impl McpSession {
    fn new(target: String, service: RunningService<RoleClient, ShellClient>) -> Self {
        let peer = service.peer().clone();
        let server_name = peer.peer_info().map(|info| info.server_info.name.clone());
        Self {
            target,
            server_name,
            peer,
            service: Mutex::new(Some(service)),
        }
    }
}

fn request_err(operation: &'static str) -> impl FnOnce(rmcp::service::ServiceError) -> SessionError {
    move |e| SessionError::Request {
        operation,
        message: e.to_string(),
    }
}

fn to_json<T: serde::Serialize>(
    operation: &'static str,
    value: &T,
) -> Result<Value, SessionError> {
    serde_json::to_value(value).map_err(|e| SessionError::Request {
        operation,
        message: e.to_string(),
    })
}

#[async_trait]
impl CapabilityProvider for McpSession {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn server_name(&self) -> Option<String> {
        self.server_name.clone()
    }

    async fn ping(&self) -> Result<(), SessionError> {
        self.peer
            .send_request(ClientRequest::PingRequest(RequestNoParam::default()))
            .await
            .map_err(request_err("ping"))?;
        Ok(())
    }

    async fn list_tools_page(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<ToolInfo>, SessionError> {
        let result = self
            .peer
            .list_tools(Some(PaginatedRequestParam { cursor }))
            .await
            .map_err(request_err("list tools"))?;
        Ok(Page {
            items: result
                .tools
                .into_iter()
                .map(|tool| ToolInfo {
                    name: tool.name.to_string(),
                    description: tool.description.map(|d| d.to_string()),
                    input_schema: Value::Object((*tool.input_schema).clone()),
                })
                .collect(),
            next_cursor: result.next_cursor,
        })
    }

    async fn list_prompts_page(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<PromptInfo>, SessionError> {
        let result = self
            .peer
            .list_prompts(Some(PaginatedRequestParam { cursor }))
            .await
            .map_err(request_err("list prompts"))?;
        Ok(Page {
            items: result
                .prompts
                .into_iter()
                .map(|prompt| PromptInfo {
                    name: prompt.name,
                    description: prompt.description,
                    arguments: prompt
                        .arguments
                        .unwrap_or_default()
                        .into_iter()
                        .map(|arg| PromptArgumentInfo {
                            name: arg.name,
                            description: arg.description,
                            required: arg.required.unwrap_or(false),
                        })
                        .collect(),
                })
                .collect(),
            next_cursor: result.next_cursor,
        })
    }

    async fn list_resources_page(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<Value>, SessionError> {
        let result = self
            .peer
            .list_resources(Some(PaginatedRequestParam { cursor }))
            .await
            .map_err(request_err("list resources"))?;
        let items = result
            .resources
            .iter()
            .map(|r| to_json("list resources", r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            next_cursor: result.next_cursor,
        })
    }

    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<Value, SessionError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(request_err("call tool"))?;
        to_json("call tool", &result)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Vec<Value>, SessionError> {
        let arguments = (!arguments.is_empty()).then(|| {
            arguments
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect::<JsonObject>()
        });
        let result = self
            .peer
            .get_prompt(GetPromptRequestParam {
                name: name.to_string(),
                arguments,
            })
            .await
            .map_err(request_err("get prompt"))?;
        result
            .messages
            .iter()
            .map(|m| to_json("get prompt", m))
            .collect()
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, SessionError> {
        let result = self
            .peer
            .read_resource(ReadResourceRequestParam {
                uri: uri.to_string(),
            })
            .await
            .map_err(request_err("read resource"))?;
        result
            .contents
            .iter()
            .map(|c| to_json("read resource", c))
            .collect()
    }

    async fn close(&self) {
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        if let Err(e) = service.cancel().await {
            tracing::warn!("Session shutdown for {} failed: {}", self.target, e);
        }
    }
}
