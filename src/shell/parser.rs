//! Splits one input line into pipeline stages and an optional redirection.
//!
//! Grammar: `stage ( '|' stage )* [ ('>' | '>>') target ]`. The three
//! operators are only recognized outside single quotes, double quotes, and
//! backslash escapes. Each stage is then split into words with shell quoting
//! rules.

use std::path::PathBuf;

use crate::error::ShellError;

/// How the redirect target is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// `>>`: create if missing, append.
    Append,
    /// `>`: create if missing, truncate.
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: PathBuf,
    pub mode: RedirectMode,
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Word lists, one per stage. An empty list is a stage with no command.
    pub stages: Vec<Vec<String>>,
    pub redirect: Option<Redirect>,
}

/// Parse `line` into a [`Pipeline`].
///
/// Fails with [`ShellError::PipelineSyntax`] on unbalanced quoting, a missing
/// redirect target, or more than one redirection.
pub fn parse(line: &str) -> Result<Pipeline, ShellError> {
    let (body, redirect) = split_redirect(line)?;

    let stages = split_unquoted(body, "|")
        .into_iter()
        .map(|stage| {
            shell_words::split(stage.trim())
                .map_err(|e| ShellError::PipelineSyntax(format!("{}: {e}", stage.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pipeline { stages, redirect })
}

fn split_redirect(line: &str) -> Result<(&str, Option<Redirect>), ShellError> {
    let mut mode = RedirectMode::Append;
    let mut parts = split_unquoted(line, ">>");
    if parts.len() == 1 {
        mode = RedirectMode::Truncate;
        parts = split_unquoted(line, ">");
    }
    if parts.len() == 1 {
        return Ok((line, None));
    }
    if parts.len() > 2 || split_unquoted(parts[0], ">").len() > 1 {
        return Err(ShellError::PipelineSyntax(
            "only one redirection is allowed".to_string(),
        ));
    }

    let target = parse_target(parts[1])?;
    Ok((
        parts[0],
        Some(Redirect {
            path: PathBuf::from(target),
            mode,
        }),
    ))
}

fn parse_target(raw: &str) -> Result<String, ShellError> {
    let mut words = shell_words::split(raw.trim())
        .map_err(|e| ShellError::PipelineSyntax(format!("redirect target: {e}")))?;
    match words.len() {
        0 => Err(ShellError::PipelineSyntax(
            "missing redirect target".to_string(),
        )),
        1 => Ok(words.remove(0)),
        _ => Err(ShellError::PipelineSyntax(format!(
            "redirect target must be a single word, got `{}`",
            raw.trim()
        ))),
    }
}

/// Split `s` on every occurrence of `token` that is not quoted or escaped.
fn split_unquoted<'a>(s: &'a str, token: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some('"'), '"') => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, _) if s[i..].starts_with(token) => {
                parts.push(&s[start..i]);
                start = i + token.len();
                // Skip the rest of a multi-byte token.
                for _ in 1..token.chars().count() {
                    chars.next();
                }
            }
            (None, _) => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
