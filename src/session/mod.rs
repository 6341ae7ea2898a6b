//! Capability provider session: the remote side that lists and serves tools,
//! prompts, and resources.
//!
//! [`CapabilityProvider`] is the seam the rest of the shell talks to. The
//! shipped implementation lives in [`mcp`]; tests plug in fakes. [`Features`]
//! is a cheap snapshot of whichever provider is attached when a command
//! starts, and takes care of pagination and the "no session" condition.

pub mod mcp;

pub use mcp::McpConnector;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::SessionError;

/// JSON object used for tool and prompt arguments.
pub type JsonObject = serde_json::Map<String, Value>;

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque continuation cursor. `None` or empty means this was the last page.
    pub next_cursor: Option<String>,
}

/// A callable tool advertised by the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolInfo {
    /// Property schemas declared in the tool's input schema.
    pub fn properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.input_schema.get("properties")?.as_object()
    }

    pub fn is_required(&self, property: &str) -> bool {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .is_some_and(|req| req.iter().any(|r| r.as_str() == Some(property)))
    }
}

/// A retrievable prompt advertised by the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgumentInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptArgumentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

/// A live session with a capability provider.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// The server this session was opened against, as the user typed it.
    fn target(&self) -> String;

    /// Name the server reported during the handshake, if any.
    fn server_name(&self) -> Option<String>;

    async fn ping(&self) -> Result<(), SessionError>;

    async fn list_tools_page(&self, cursor: Option<String>)
    -> Result<Page<ToolInfo>, SessionError>;

    async fn list_prompts_page(
        &self,
        cursor: Option<String>,
    ) -> Result<Page<PromptInfo>, SessionError>;

    async fn list_resources_page(&self, cursor: Option<String>)
    -> Result<Page<Value>, SessionError>;

    /// Invoke a tool. Returns the provider's full result object.
    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<Value, SessionError>;

    /// Render a prompt. Returns its messages.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Vec<Value>, SessionError>;

    /// Read a resource. Returns its content items.
    async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, SessionError>;

    /// Shut the session down. Further calls may fail.
    async fn close(&self);
}

/// Opens provider sessions for the `connect` command.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &str,
        args: &[String],
    ) -> Result<Arc<dyn CapabilityProvider>, SessionError>;
}

/// Snapshot of the attached provider, if any.
#[derive(Clone, Default)]
pub struct Features {
    provider: Option<Arc<dyn CapabilityProvider>>,
}

impl Features {
    pub fn new(provider: Option<Arc<dyn CapabilityProvider>>) -> Self {
        Self { provider }
    }

    fn provider(&self) -> Result<Arc<dyn CapabilityProvider>, SessionError> {
        self.provider.clone().ok_or(SessionError::NoSession)
    }

    /// Every tool across all pages.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, SessionError> {
        let provider = self.provider()?;
        collect_pages(move |cursor| {
            let provider = provider.clone();
            async move { provider.list_tools_page(cursor).await }
        })
        .await
    }

    /// Every prompt across all pages.
    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>, SessionError> {
        let provider = self.provider()?;
        collect_pages(move |cursor| {
            let provider = provider.clone();
            async move { provider.list_prompts_page(cursor).await }
        })
        .await
    }

    /// Every resource across all pages.
    pub async fn list_resources(&self) -> Result<Vec<Value>, SessionError> {
        let provider = self.provider()?;
        collect_pages(move |cursor| {
            let provider = provider.clone();
            async move { provider.list_resources_page(cursor).await }
        })
        .await
    }

    pub async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<Value, SessionError> {
        self.provider()?.call_tool(name, arguments).await
    }

    /// Invoke a tool with a raw JSON argument string and return its first
    /// content item serialized as JSON. Results without content items are
    /// returned whole.
    ///
    /// An empty or whitespace-only payload means "no arguments".
    pub async fn call_tool_json(&self, name: &str, raw_arguments: &str) -> Result<String, SessionError> {
        let provider = self.provider()?;
        let arguments = parse_arguments(raw_arguments)?;
        let result = provider.call_tool(name, arguments).await?;
        let item = result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .unwrap_or(&result);
        serde_json::to_string(item).map_err(|e| SessionError::Request {
            operation: "encode tool result",
            message: e.to_string(),
        })
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Vec<Value>, SessionError> {
        self.provider()?.get_prompt(name, arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, SessionError> {
        self.provider()?.read_resource(uri).await
    }
}

/// Parse a raw JSON argument payload into an object.
pub fn parse_arguments(raw: &str) -> Result<JsonObject, SessionError> {
    if raw.trim().is_empty() {
        return Ok(JsonObject::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(JsonObject::new()),
        Ok(other) => Err(SessionError::InvalidArguments(format!(
            "expected a JSON object, got: {other}"
        ))),
        Err(e) => Err(SessionError::InvalidArguments(e.to_string())),
    }
}

/// Loop a paginated listing until the cursor runs out.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, SessionError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, SessionError>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    loop {
        let page = fetch(cursor.take()).await?;
        items.extend(page.items);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(items)
}
