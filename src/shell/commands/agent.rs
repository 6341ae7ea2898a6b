//! Capability and conversation commands: `msg`, `ctx`, `tool`, `prompt`,
//! `resource`, and the three listings.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::Value;
use tokio::io::AsyncReadExt;

use super::{Control, Invocation};
use crate::agent::TurnOutcome;
use crate::error::ShellError;
use crate::session::{JsonObject, PromptInfo, ToolInfo, parse_arguments};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// `msg <text...>` or `msg -` to read the message from stdin.
pub async fn msg(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    if inv.args.is_empty() {
        return Err(ShellError::Usage);
    }
    let agent = inv.shell.agent()?.clone();
    inv.shell.ensure_contexts_loaded()?;

    let text = if inv.args.len() == 1 && inv.args[0] == "-" {
        let mut buf = String::new();
        let cancel = inv.cancel;
        let Some(read) = cancel
            .run_until_cancelled(inv.input.read_to_string(&mut buf))
            .await
        else {
            return Ok(Control::Continue);
        };
        read?;
        buf
    } else {
        inv.args.join(" ")
    };
    if text.trim().is_empty() {
        return Err(ShellError::Usage);
    }

    let features = inv.shell.features();
    match agent
        .run_turn(&features, &text, &mut *inv.output, inv.cancel)
        .await?
    {
        TurnOutcome::Completed | TurnOutcome::Cancelled => Ok(Control::Continue),
    }
}

/// `ctx <subcommand>`.
pub async fn ctx(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    inv.shell.agent()?;
    let args = inv.args;
    let Some(sub) = args.first() else {
        return Err(ShellError::Usage);
    };
    inv.shell.ensure_contexts_loaded()?;
    let store = inv.shell.contexts().clone();

    match sub.as_str() {
        "new" => store.new_context(),
        "clear" => store.clear(),
        "dump" => {
            for message in store.current_messages() {
                inv.write_json_line(&message).await?;
            }
        }
        "pop" => {
            let message = store.pop()?;
            inv.write_json_line(&message).await?;
        }
        "ls" | "list" => {
            let rows = store.list();
            if rows.is_empty() {
                inv.write_line("No data").await?;
            }
            for row in rows {
                let marker = if row.current { '*' } else { ' ' };
                inv.write_line(&format!("{marker} {}: {}", row.index, row.title))
                    .await?;
            }
        }
        "use" | "switch" => store.switch_to(context_index(args)?)?,
        "del" | "delete" => store.delete(context_index(args)?)?,
        "save" => inv.shell.save_contexts()?,
        _ => return Err(ShellError::Usage),
    }
    Ok(Control::Continue)
}

fn context_index(args: &[String]) -> Result<usize, ShellError> {
    let raw = args.get(1).ok_or(ShellError::Usage)?;
    raw.parse()
        .map_err(|_| ShellError::InvalidArgument(format!("invalid context index: {raw}")))
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

pub async fn list_tools(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    for tool in inv.shell.features().list_tools().await? {
        inv.write_json_line(&tool).await?;
    }
    Ok(Control::Continue)
}

pub async fn list_prompts(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    for prompt in inv.shell.features().list_prompts().await? {
        inv.write_json_line(&prompt).await?;
    }
    Ok(Control::Continue)
}

pub async fn list_resources(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    for resource in inv.shell.features().list_resources().await? {
        inv.write_json_line(&resource).await?;
    }
    Ok(Control::Continue)
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// `tool <name> [@file | '{json}' | --opt value ...]`.
pub async fn call_tool(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let args = inv.args;
    let Some((name, rest)) = args.split_first() else {
        return Err(ShellError::Usage);
    };
    let features = inv.shell.features();

    let arguments = match raw_payload(rest).await? {
        Some(raw) => parse_arguments(&raw)?,
        None if rest.is_empty() => JsonObject::new(),
        None => {
            let tools = features.list_tools().await?;
            let tool = tools
                .iter()
                .find(|t| &t.name == name)
                .ok_or_else(|| ShellError::InvalidArgument(format!("unknown tool: {name}")))?;
            match tool_arguments(tool, rest)? {
                Some(arguments) => arguments,
                None => {
                    eprint!("{}", tool_usage(tool));
                    return Ok(Control::Continue);
                }
            }
        }
    };

    tracing::info!(tool = %name, "Calling tool");
    let result = features
        .call_tool(name, arguments)
        .await
        .map_err(|source| ShellError::ToolInvocation {
            name: name.clone(),
            source,
        })?;

    match result.get("content").and_then(Value::as_array) {
        Some(items) => {
            for item in items {
                inv.write_json_line(item).await?;
            }
        }
        None => inv.write_json_line(&result).await?,
    }
    Ok(Control::Continue)
}

/// `prompt <name> [@file | '{json}' | --arg value ...]`.
pub async fn get_prompt(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let args = inv.args;
    let Some((name, rest)) = args.split_first() else {
        return Err(ShellError::Usage);
    };
    let features = inv.shell.features();

    let arguments = match raw_payload(rest).await? {
        Some(raw) => parse_arguments(&raw)?
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        None if rest.is_empty() => HashMap::new(),
        None => {
            let prompts = features.list_prompts().await?;
            let prompt = prompts
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| ShellError::InvalidArgument(format!("unknown prompt: {name}")))?;
            match prompt_arguments(prompt, rest)? {
                Some(arguments) => arguments,
                None => {
                    eprint!("{}", prompt_usage(prompt));
                    return Ok(Control::Continue);
                }
            }
        }
    };

    let messages = features
        .get_prompt(name, arguments)
        .await
        .map_err(|source| ShellError::PromptRetrieval {
            name: name.clone(),
            source,
        })?;
    for message in messages {
        inv.write_json_line(&message).await?;
    }
    Ok(Control::Continue)
}

/// `resource <uri>`.
pub async fn read_resource(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let args = inv.args;
    let Some(uri) = args.first() else {
        return Err(ShellError::Usage);
    };
    for item in inv.shell.features().read_resource(uri).await? {
        inv.write_json_line(&item).await?;
    }
    Ok(Control::Continue)
}

/// A JSON payload given as `@file` or inline `{...}`, if that is the form used.
async fn raw_payload(rest: &[String]) -> Result<Option<String>, ShellError> {
    let Some(first) = rest.first() else {
        return Ok(None);
    };
    if let Some(path) = first.strip_prefix('@') {
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            ShellError::InvalidArgument(format!("read arguments from {path}: {e}"))
        })?;
        return Ok(Some(data.trim().to_string()));
    }
    if rest.len() == 1 && first.trim_start().starts_with('{') {
        return Ok(Some(first.clone()));
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Option parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    /// Takes a value.
    Value,
    /// Boolean; the value may be omitted.
    Flag,
}

/// Split `--key value`, `--key=value`, and `-key value` pairs.
///
/// Returns `None` when help was requested.
fn parse_options(
    opts: &[String],
    kind_of: impl Fn(&str) -> Option<OptionKind>,
) -> Result<Option<Vec<(String, String)>>, ShellError> {
    let mut pairs = Vec::new();
    let mut iter = opts.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "-h" || arg == "--help" {
            return Ok(None);
        }
        let stripped = arg
            .strip_prefix("--")
            .or_else(|| arg.strip_prefix('-'))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ShellError::InvalidArgument(format!("unexpected argument: {arg}")))?;
        let (key, inline) = match stripped.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (stripped, None),
        };
        let kind = kind_of(key)
            .ok_or_else(|| ShellError::InvalidArgument(format!("unknown option: --{key}")))?;

        let bare_flag = iter.peek().is_none_or(|next| next.starts_with('-'));
        let value = match (inline, kind) {
            (Some(value), _) => value,
            (None, OptionKind::Flag) if bare_flag => "true".to_string(),
            (None, _) => iter
                .next()
                .cloned()
                .ok_or_else(|| ShellError::InvalidArgument(format!("missing value for --{key}")))?,
        };
        pairs.push((key.to_string(), value));
    }
    Ok(Some(pairs))
}

fn schema_type(schema: &Value) -> &str {
    schema.get("type").and_then(Value::as_str).unwrap_or("string")
}

/// Build a tool's argument object from options, coercing by schema type.
fn tool_arguments(tool: &ToolInfo, opts: &[String]) -> Result<Option<JsonObject>, ShellError> {
    let empty = serde_json::Map::new();
    let properties = tool.properties().unwrap_or(&empty);
    let pairs = parse_options(opts, |key| {
        properties.get(key).map(|schema| match schema_type(schema) {
            "boolean" => OptionKind::Flag,
            _ => OptionKind::Value,
        })
    })?;
    let Some(pairs) = pairs else {
        return Ok(None);
    };

    let mut arguments = JsonObject::new();
    for (key, raw) in pairs {
        let ty = properties.get(&key).map(schema_type).unwrap_or("string");
        let value = coerce(&key, ty, raw)?;
        arguments.insert(key, value);
    }
    Ok(Some(arguments))
}

fn coerce(key: &str, ty: &str, raw: String) -> Result<Value, ShellError> {
    let invalid = |what: &str| ShellError::InvalidArgument(format!("--{key}: expected {what}"));
    Ok(match ty {
        "integer" => Value::from(raw.parse::<i64>().map_err(|_| invalid("an integer"))?),
        "number" => {
            let n = raw.parse::<f64>().map_err(|_| invalid("a number"))?;
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| invalid("a finite number"))?
        }
        "boolean" => Value::Bool(raw.parse().map_err(|_| invalid("true or false"))?),
        "array" | "object" => serde_json::from_str(&raw).map_err(|_| invalid("JSON"))?,
        _ => Value::String(raw),
    })
}

fn prompt_arguments(
    prompt: &PromptInfo,
    opts: &[String],
) -> Result<Option<HashMap<String, String>>, ShellError> {
    let pairs = parse_options(opts, |key| {
        prompt
            .arguments
            .iter()
            .any(|a| a.name == key)
            .then_some(OptionKind::Value)
    })?;
    Ok(pairs.map(|pairs| pairs.into_iter().collect()))
}

fn tool_usage(tool: &ToolInfo) -> String {
    let mut out = format!("Usage: tool {} [options]\n\n", tool.name);
    if let Some(desc) = &tool.description {
        let _ = writeln!(out, "{desc}\n");
    }
    out.push_str("Options:\n");
    if let Some(properties) = tool.properties() {
        for (name, schema) in properties {
            let desc = schema
                .get("description")
                .or_else(|| schema.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let marker = if tool.is_required(name) {
                "required"
            } else {
                "optional"
            };
            let _ = writeln!(
                out,
                "  --{name} <{}>\n        {desc} ({marker})",
                schema_type(schema)
            );
        }
    }
    out
}

fn prompt_usage(prompt: &PromptInfo) -> String {
    let mut out = format!("Usage: prompt {} [options]\n\n", prompt.name);
    if let Some(desc) = &prompt.description {
        let _ = writeln!(out, "{desc}\n");
    }
    out.push_str("Options:\n");
    for arg in &prompt.arguments {
        let marker = if arg.required { "required" } else { "optional" };
        let _ = writeln!(
            out,
            "  --{} <string>\n        {} ({marker})",
            arg.name,
            arg.description.as_deref().unwrap_or("")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PromptArgumentInfo;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn search_tool() -> ToolInfo {
        ToolInfo {
            name: "search".into(),
            description: Some("Search the index".into()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "q": {"type": "string", "description": "query"},
                    "limit": {"type": "integer"},
                    "score": {"type": "number"},
                    "exact": {"type": "boolean"},
                    "tags": {"type": "array"}
                },
                "required": ["q"]
            }),
        }
    }

    #[test]
    fn options_are_coerced_by_schema_type() {
        let args = tool_arguments(
            &search_tool(),
            &words(&[
                "--q", "rust", "--limit=5", "-score", "0.5", "--exact", "--tags", r#"["a"]"#,
            ]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(args["q"], "rust");
        assert_eq!(args["limit"], 5);
        assert_eq!(args["score"], 0.5);
        assert_eq!(args["exact"], true);
        assert_eq!(args["tags"], serde_json::json!(["a"]));
    }

    #[test]
    fn flag_accepts_explicit_value() {
        let args = tool_arguments(&search_tool(), &words(&["--exact=false", "--q", "x"]))
            .unwrap()
            .unwrap();
        assert_eq!(args["exact"], false);
    }

    #[test]
    fn bad_options_are_rejected() {
        let tool = search_tool();
        for opts in [
            &["--nope", "1"][..],
            &["--limit", "five"],
            &["--q"],
            &["stray"],
        ] {
            assert!(
                matches!(
                    tool_arguments(&tool, &words(opts)),
                    Err(ShellError::InvalidArgument(_))
                ),
                "expected rejection for {opts:?}"
            );
        }
    }

    #[test]
    fn help_short_circuits() {
        assert!(
            tool_arguments(&search_tool(), &words(&["--q", "x", "-h"]))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn usage_marks_required_options() {
        let usage = tool_usage(&search_tool());
        assert!(usage.contains("--q <string>"));
        assert!(usage.contains("query (required)"));
        assert!(usage.contains("--limit <integer>"));
    }

    #[test]
    fn prompt_options_stay_strings() {
        let prompt = PromptInfo {
            name: "review".into(),
            description: None,
            arguments: vec![PromptArgumentInfo {
                name: "code".into(),
                description: None,
                required: true,
            }],
        };
        let args = prompt_arguments(&prompt, &words(&["--code", "fn main() {}"]))
            .unwrap()
            .unwrap();
        assert_eq!(args["code"], "fn main() {}");
        assert!(prompt_arguments(&prompt, &words(&["--lang", "rs"])).is_err());
    }

    #[tokio::test]
    async fn payload_forms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("args.json");
        std::fs::write(&path, "  {\"q\": \"from file\"}\n").unwrap();

        let from_file = raw_payload(&[format!("@{}", path.display())]).await.unwrap();
        assert_eq!(from_file.as_deref(), Some("{\"q\": \"from file\"}"));

        let inline = raw_payload(&words(&[r#"{"q":"x"}"#])).await.unwrap();
        assert_eq!(inline.as_deref(), Some(r#"{"q":"x"}"#));

        assert!(raw_payload(&words(&["--q", "x"])).await.unwrap().is_none());
        assert!(raw_payload(&words(&["@/no/such/file"])).await.is_err());
    }
}
