//! The interactive shell: session state plus line execution.
//!
//! A [`Shell`] owns the attached capability provider (if any), the context
//! store, and the optional agent. [`Shell::execute`] parses one line and runs
//! it as a pipeline; the REPL in [`repl`] drives it line by line.

pub mod commands;
pub mod parser;
pub mod pipeline;
pub mod repl;
pub mod stage_io;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, ChatCompletion, ContextStore};
use crate::error::{AgentError, ContextError, ShellError};
use crate::session::{CapabilityProvider, Connector, Features};
use stage_io::StageInput;

/// Result of executing one command line.
#[derive(Debug)]
pub enum Outcome {
    Continue,
    /// The operator asked to leave the shell.
    Exit,
    Failed(ShellError),
}

/// Static settings a [`Shell`] is built from.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub context_file: PathBuf,
    /// Model name, shown by `status`. `None` when the agent is disabled.
    pub model: Option<String>,
}

pub struct Shell {
    session: RwLock<Option<Arc<dyn CapabilityProvider>>>,
    connector: Arc<dyn Connector>,
    agent: Option<Agent>,
    contexts: Arc<ContextStore>,
    /// Variables set with `export`, passed to every external stage.
    exported: Mutex<BTreeMap<String, String>>,
    options: ShellOptions,
}

impl Shell {
    /// Build a shell. The agent is enabled only when `completion` is given.
    pub fn new(
        options: ShellOptions,
        connector: Arc<dyn Connector>,
        completion: Option<Arc<dyn ChatCompletion>>,
    ) -> Self {
        let contexts = Arc::new(ContextStore::new());
        let agent = completion.map(|c| Agent::new(c, Arc::clone(&contexts)));
        Self {
            session: RwLock::new(None),
            connector,
            agent,
            contexts,
            exported: Mutex::new(BTreeMap::new()),
            options,
        }
    }

    // -- Session ------------------------------------------------------------

    pub fn session(&self) -> Option<Arc<dyn CapabilityProvider>> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Snapshot of the attached provider for one command.
    pub fn features(&self) -> Features {
        Features::new(self.session())
    }

    /// Attach `provider`, returning the one it replaces.
    pub fn attach(
        &self,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Option<Arc<dyn CapabilityProvider>> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(provider)
    }

    pub fn detach(&self) -> Option<Arc<dyn CapabilityProvider>> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    // -- Agent --------------------------------------------------------------

    pub fn agent(&self) -> Result<&Agent, AgentError> {
        self.agent.as_ref().ok_or(AgentError::Disabled)
    }

    pub fn model(&self) -> Option<&str> {
        self.options.model.as_deref()
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// Load the context file on first use. Later calls are no-ops.
    pub fn ensure_contexts_loaded(&self) -> Result<(), ContextError> {
        self.contexts.load(&self.options.context_file)
    }

    pub fn save_contexts(&self) -> Result<(), ContextError> {
        self.contexts.save(&self.options.context_file)
    }

    // -- Environment --------------------------------------------------------

    pub fn export_var(&self, key: &str, value: &str) {
        self.exported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    /// Variables exported in this shell.
    pub fn exported_vars(&self) -> BTreeMap<String, String> {
        self.exported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The process environment with exported variables layered on top.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = std::env::vars().collect();
        vars.extend(self.exported_vars());
        vars
    }

    // -- Execution ----------------------------------------------------------

    /// Run one line with the shell's stdin feeding the first stage.
    pub async fn execute(self: &Arc<Self>, line: &str, cancel: &CancellationToken) -> Outcome {
        self.execute_with_input(line, StageInput::Stdin, cancel).await
    }

    /// Run one line with an explicit input for the first stage.
    pub async fn execute_with_input(
        self: &Arc<Self>,
        line: &str,
        input: StageInput,
        cancel: &CancellationToken,
    ) -> Outcome {
        let pipeline = match parser::parse(line) {
            Ok(pipeline) => pipeline,
            Err(e) => return Outcome::Failed(e),
        };
        match pipeline::start(self, pipeline, input, cancel) {
            Ok(run) => run.outcome().await,
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Run one line, cancelling it when the process receives Ctrl-C.
    pub async fn execute_interruptible(self: &Arc<Self>, line: &str) -> Outcome {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::debug!("Interrupt received, cancelling command");
                    cancel.cancel();
                }
            })
        };
        let outcome = self.execute(line, &cancel).await;
        watcher.abort();
        outcome
    }

    /// Persist contexts (if they were ever loaded) and close the session.
    pub async fn shutdown(&self) {
        if self.agent.is_some() && self.contexts.is_loaded() {
            if let Err(e) = self.save_contexts() {
                tracing::warn!("Failed to save contexts: {e}");
            }
        }
        self.close_session().await;
    }

    /// Detach and close the session without touching persisted contexts.
    pub async fn close_session(&self) {
        if let Some(session) = self.detach() {
            session.close().await;
        }
    }
}
