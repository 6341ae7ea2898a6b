//! Small file-system and environment helpers.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use super::{Control, Invocation};
use crate::error::ShellError;

const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

/// `cat [file...]`. Without files, copies the stage input.
pub async fn cat(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let args = inv.args;
    if args.is_empty() {
        tokio::io::copy(&mut inv.input, &mut inv.output).await?;
        return Ok(Control::Continue);
    }
    for path in args {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ShellError::InvalidArgument(format!("cat {path}: {e}")))?;
        inv.output.write_all(&data).await?;
        if data.last().is_some_and(|b| *b != b'\n') {
            inv.output.write_all(b"\n").await?;
        }
    }
    Ok(Control::Continue)
}

/// `cd [dir]`. Defaults to the home directory.
pub fn cd(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let dir = match inv.args.first() {
        Some(dir) => PathBuf::from(dir),
        None => directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::env::set_current_dir(&dir)
        .map_err(|e| ShellError::InvalidArgument(format!("cd {}: {e}", dir.display())))?;
    Ok(Control::Continue)
}

pub async fn clear(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    inv.output.write_all(CLEAR_SCREEN.as_bytes()).await?;
    Ok(Control::Continue)
}

/// `env`: every variable as `KEY=value`, sorted.
pub async fn env(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    for (key, value) in inv.shell.environment() {
        inv.write_line(&format!("{key}={value}")).await?;
    }
    Ok(Control::Continue)
}

/// `export [KEY=value ...]`. Without arguments behaves like `env`.
pub async fn export(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let args = inv.args;
    if args.is_empty() {
        return env(inv).await;
    }
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => inv.shell.export_var(key, value),
            _ => tracing::warn!("export: ignoring `{arg}`"),
        }
    }
    Ok(Control::Continue)
}

/// `ls [dir]`. Directories get a trailing slash.
pub async fn ls(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let dir = inv
        .args
        .iter()
        .find(|a| !a.starts_with('-'))
        .map(String::as_str)
        .unwrap_or(".");
    let read_err = |e: std::io::Error| ShellError::InvalidArgument(format!("ls {dir}: {e}"));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    for name in names {
        inv.write_line(&name).await?;
    }
    Ok(Control::Continue)
}

pub async fn pwd(inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
    let dir = std::env::current_dir()?;
    inv.write_line(&dir.display().to_string()).await?;
    Ok(Control::Continue)
}
