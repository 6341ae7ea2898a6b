//! `connect`, `disconnect`, and `status`.

use serde::Serialize;

use super::{Control, Invocation};
use crate::error::{SessionError, ShellError};

#[derive(Serialize)]
struct Notice<'a> {
    msg: &'a str,
}

#[derive(Serialize)]
struct Status<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    llm: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    status: String,
}

/// `connect <server> [args...]`. Replaces any attached session.
pub async fn connect(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let args = inv.args;
    let Some((target, extra)) = args.split_first() else {
        return Err(ShellError::Usage);
    };

    let provider = inv.shell.connector().connect(target, extra).await?;
    if let Some(previous) = inv.shell.attach(provider) {
        inv.write_json_line(&Notice {
            msg: "disconnecting",
        })
        .await?;
        previous.close().await;
    }
    status(inv).await
}

/// `disconnect`. A no-op without a session.
pub async fn disconnect(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let Some(previous) = inv.shell.detach() else {
        return Ok(Control::Continue);
    };
    inv.write_json_line(&Notice {
        msg: "disconnecting",
    })
    .await?;
    previous.close().await;
    status(inv).await
}

/// `status`: one JSON line with the model, server, and connection health.
pub async fn status(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let (server, status) = match inv.shell.session() {
        None => (None, SessionError::NoSession.to_string()),
        Some(session) => {
            let status = match session.ping().await {
                Ok(()) => match session.server_name() {
                    Some(name) => format!("connected ({name})"),
                    None => "connected".to_string(),
                },
                Err(e) => {
                    tracing::warn!("Ping failed: {e}");
                    "unhealthy".to_string()
                }
            };
            (Some(session.target()), status)
        }
    };
    let shell = inv.shell.clone();
    inv.write_json_line(&Status {
        llm: shell.model(),
        server,
        status,
    })
    .await?;
    Ok(Control::Continue)
}
