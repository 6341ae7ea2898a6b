//! Multi-context conversation store.
//!
//! Holds an ordered list of message histories with one "current" entry. The
//! store is materialized lazily: any access that needs a current context on an
//! empty store creates one empty context first, so `0 <= current < len` holds
//! whenever a context is handed out.
//!
//! Persistence is explicit. [`ContextStore::load`] reads the backing file at
//! most once per store (guarded by the `loaded` flag under the store lock);
//! [`ContextStore::save`] rewrites the whole file through a temp file + rename.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::error::ContextError;

/// Title used for contexts that have no messages yet.
const NEW_CONTEXT_TITLE: &str = "New context";

/// Title used when the first message carries no plain text.
const NON_TEXT_TITLE: &str = "(structured message)";

/// One independent message history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Summary row returned by [`ContextStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub index: usize,
    pub title: String,
    pub current: bool,
}

/// On-disk document: `{ "current": <int>, "contexts": [ {"messages": [...]}, ... ] }`.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    current: usize,
    contexts: Vec<Context>,
}

#[derive(Debug, Default)]
struct StoreState {
    contexts: Vec<Context>,
    current: usize,
    loaded: bool,
}

impl StoreState {
    /// Return the current context, creating an empty one if the store is empty.
    fn current_mut(&mut self) -> &mut Context {
        if self.contexts.is_empty() {
            self.contexts.push(Context::default());
            self.current = 0;
        }
        let index = self.current.min(self.contexts.len() - 1);
        self.current = index;
        &mut self.contexts[index]
    }

    fn check_index(&self, index: usize) -> Result<(), ContextError> {
        if index >= self.contexts.len() {
            return Err(ContextError::InvalidIndex(index));
        }
        Ok(())
    }
}

/// Thread-safe store of conversation contexts.
#[derive(Debug, Default)]
pub struct ContextStore {
    state: Mutex<StoreState>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Persistence --------------------------------------------------------

    /// Populate the store from `path`, once.
    ///
    /// A second call is a no-op even if the first one failed. A missing file
    /// leaves the store empty and is not an error.
    pub fn load(&self, path: &Path) -> Result<(), ContextError> {
        let mut state = self.lock();
        if state.loaded {
            return Ok(());
        }
        state.loaded = true;

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No context store at {}, starting empty", path.display());
                return Ok(());
            }
            Err(source) => {
                return Err(ContextError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let file: StoreFile =
            serde_json::from_slice(&bytes).map_err(|source| ContextError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        state.current = if file.contexts.is_empty() {
            0
        } else {
            file.current.min(file.contexts.len() - 1)
        };
        state.contexts = file.contexts;
        tracing::debug!(
            contexts = state.contexts.len(),
            current = state.current,
            "Loaded context store from {}",
            path.display()
        );
        Ok(())
    }

    /// Whether [`ContextStore::load`] has run for this store.
    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    /// Write `{current, contexts}` to `path` as a single atomic replace.
    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        let encoded = {
            let state = self.lock();
            let file = StoreFile {
                current: state.current,
                contexts: state.contexts.clone(),
            };
            serde_json::to_vec(&file).map_err(ContextError::Encode)?
        };

        let io_err = |source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = temp_path(path);
        std::fs::write(&tmp, &encoded).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        tracing::debug!("Saved context store to {}", path.display());
        Ok(())
    }

    // -- Mutation -----------------------------------------------------------

    /// Append an empty context and make it current.
    pub fn new_context(&self) {
        let mut state = self.lock();
        state.contexts.push(Context::default());
        state.current = state.contexts.len() - 1;
    }

    /// Empty the current context's messages. The index is unchanged.
    pub fn clear(&self) {
        self.lock().current_mut().messages.clear();
    }

    /// Remove context `index`, shifting `current` down when it sat at or after it.
    pub fn delete(&self, index: usize) -> Result<(), ContextError> {
        let mut state = self.lock();
        state.check_index(index)?;
        state.contexts.remove(index);
        if index <= state.current {
            state.current = state.current.saturating_sub(1);
        }
        let last = state.contexts.len().saturating_sub(1);
        state.current = state.current.min(last);
        Ok(())
    }

    pub fn switch_to(&self, index: usize) -> Result<(), ContextError> {
        let mut state = self.lock();
        state.check_index(index)?;
        state.current = index;
        Ok(())
    }

    /// Append one message to the current context.
    pub fn push_message(&self, message: Message) {
        self.lock().current_mut().messages.push(message);
    }

    /// Replace the current context's messages wholesale.
    pub fn replace_current(&self, messages: Vec<Message>) {
        self.lock().current_mut().messages = messages;
    }

    /// Remove and return the last message of the current context.
    pub fn pop(&self) -> Result<Message, ContextError> {
        self.lock()
            .current_mut()
            .messages
            .pop()
            .ok_or(ContextError::Empty)
    }

    // -- Queries ------------------------------------------------------------

    /// Snapshot of the current context's messages.
    pub fn current_messages(&self) -> Vec<Message> {
        self.lock().current_mut().messages.clone()
    }

    pub fn current_index(&self) -> usize {
        self.lock().current
    }

    pub fn len(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index, derived title, and current flag for every context.
    pub fn list(&self) -> Vec<ContextInfo> {
        let state = self.lock();
        state
            .contexts
            .iter()
            .enumerate()
            .map(|(index, context)| ContextInfo {
                index,
                title: title_of(context),
                current: index == state.current,
            })
            .collect()
    }
}

fn title_of(context: &Context) -> String {
    match context.messages.first() {
        None => NEW_CONTEXT_TITLE.to_string(),
        Some(first) => first
            .text()
            .map(str::to_string)
            .unwrap_or_else(|| NON_TEXT_TITLE.to_string()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
