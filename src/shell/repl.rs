//! Read-eval-print loop over a [`Shell`].
//!
//! Reads one line at a time with `rustyline`, runs it to completion, and
//! reports failures. Only `exit` or end of input leave the loop.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::commands::HELP;
use super::{Outcome, Shell};

const PROMPT: &str = "mcpsh> ";

/// Run the interactive loop until exit, then shut the shell down.
pub async fn run(shell: Arc<Shell>, history_file: &Path) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to create line editor")?;
    if let Err(e) = editor.load_history(history_file) {
        tracing::debug!("No history loaded from {}: {e}", history_file.display());
    }

    loop {
        let line = match tokio::task::block_in_place(|| editor.readline(PROMPT)) {
            Ok(line) => line,
            // Ctrl-C at the prompt discards the line.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if !report(shell.execute_interruptible(line).await) {
            break;
        }
    }

    if let Some(parent) = history_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(history_file) {
        tracing::warn!("Failed to save history to {}: {e}", history_file.display());
    }
    shell.shutdown().await;
    Ok(())
}

/// Print a line's outcome. Returns `false` when the shell should exit.
pub fn report(outcome: Outcome) -> bool {
    match outcome {
        Outcome::Continue => true,
        Outcome::Exit => false,
        Outcome::Failed(e) if e.is_usage() => {
            print!("{HELP}");
            true
        }
        Outcome::Failed(e) => {
            eprintln!("Error: {e}");
            true
        }
    }
}
