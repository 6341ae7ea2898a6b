use super::schema::{AppConfig, PartialConfig};
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For server and headers: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            model: self.model.or(fallback.model),
            llm_base_url: self.llm_base_url.or(fallback.llm_base_url),
            llm_api_key: self.llm_api_key.or(fallback.llm_api_key),
            context_file: self.context_file.or(fallback.context_file),
            history_file: self.history_file.or(fallback.history_file),
            server: self.server.or(fallback.server),
            headers: self.headers.or(fallback.headers),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults
    /// rooted at `data_dir`.
    pub fn finalize(self, data_dir: PathBuf) -> AppConfig {
        AppConfig {
            model: self.model.filter(|m| !m.is_empty()),
            llm_base_url: self.llm_base_url.filter(|u| !u.is_empty()),
            llm_api_key: self.llm_api_key.filter(|k| !k.is_empty()),
            context_file: self
                .context_file
                .unwrap_or_else(|| data_dir.join("contexts.json")),
            history_file: self
                .history_file
                .unwrap_or_else(|| data_dir.join("history.txt")),
            server: self.server.unwrap_or_default(),
            headers: self.headers.unwrap_or_default(),
        }
    }
}
