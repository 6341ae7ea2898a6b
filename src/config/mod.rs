pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::Cli;
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

const ENV_MODEL: &str = "MCPSH_MODEL";
const ENV_CONTEXT_FILE: &str = "MCPSH_CONTEXT_FILE";
const ENV_HISTORY_FILE: &str = "MCPSH_HISTORY_FILE";
const ENV_LLM_BASE_URL: &str = "MCPSH_LLM_BASE_URL";
const ENV_LLM_API_KEY: &str = "MCPSH_LLM_API_KEY";

/// Load configuration by merging CLI, environment, and config file sources.
/// Precedence: CLI > environment > config file > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Config file (--config, else the platform config directory)
    let file = match cli.config.clone().or_else(global_config_path) {
        Some(path) => load_config_file(&path),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    };

    // Layer 2: Environment
    let env = env_to_partial(|key| std::env::var(key).ok());

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    let config = cli_partial
        .with_fallback(env)
        .with_fallback(file)
        .finalize(data_dir());
    check(&config)?;

    Ok(config)
}

/// Reject combinations that cannot work.
fn check(config: &AppConfig) -> Result<(), ConfigError> {
    if config.llm_base_url.is_some() && config.model.is_none() {
        return Err(ConfigError::Invalid(
            "a model is required when an LLM base URL is set".to_string(),
        ));
    }
    Ok(())
}

/// Read a config file, logging and ignoring anything unusable.
fn load_config_file(path: &Path) -> PartialConfig {
    match load_toml_file(path) {
        Ok(Some(partial)) => {
            tracing::info!("Loaded config from {}", path.display());
            partial
        }
        Ok(None) => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            PartialConfig::default()
        }
        Err(e) => {
            tracing::warn!("Config error: {e}");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns `Ok(None)` when the file does not exist.
pub fn load_toml_file(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file = toml::from_str::<ConfigFile>(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Some(file.to_partial()))
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/mcpsh/mcpsh.toml
/// macOS: ~/Library/Application Support/mcpsh/mcpsh.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "mcpsh").map(|dirs| dirs.config_dir().join("mcpsh.toml"))
}

/// Directory for persisted state (contexts, history).
/// Falls back to the working directory when no home directory is known.
fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "mcpsh")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Read the `MCPSH_*` variables through `lookup`. Empty values count as unset.
fn env_to_partial(lookup: impl Fn(&str) -> Option<String>) -> PartialConfig {
    let get = |key| lookup(key).filter(|v: &String| !v.is_empty());
    PartialConfig {
        model: get(ENV_MODEL),
        llm_base_url: get(ENV_LLM_BASE_URL),
        llm_api_key: get(ENV_LLM_API_KEY),
        context_file: get(ENV_CONTEXT_FILE).map(PathBuf::from),
        history_file: get(ENV_HISTORY_FILE).map(PathBuf::from),
        server: None,
        headers: None,
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    PartialConfig {
        model: cli.model.clone(),
        llm_base_url: cli.llm_base_url.clone(),
        llm_api_key: cli.llm_api_key.clone(),
        context_file: cli.context_file.clone(),
        history_file: cli.history_file.clone(),
        server: (!cli.server.is_empty()).then(|| cli.server.clone()),
        headers: (!cli.headers.is_empty()).then(|| cli.headers.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    #[test]
    fn toml_sections_map_to_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpsh.toml");
        std::fs::write(
            &path,
            r#"
[llm]
model = "gpt-4o-mini"
base_url = "http://localhost:8080/v1"

[shell]
context_file = "/tmp/ctx.json"

[server]
connect = ["npx", "-y", "@modelcontextprotocol/server-everything"]
headers = ["Authorization: Bearer abc"]
"#,
        )
        .unwrap();

        let partial = load_toml_file(&path).unwrap().unwrap();
        assert_eq!(partial.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(partial.context_file, Some(PathBuf::from("/tmp/ctx.json")));
        assert_eq!(partial.history_file, None);
        assert_eq!(partial.server.unwrap().len(), 3);
        assert_eq!(partial.llm_base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(partial.llm_api_key, None);
        assert_eq!(partial.headers, Some(vec!["Authorization: Bearer abc".to_string()]));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_toml_file(&dir.path().join("nope.toml")).unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[llm\nmodel = ").unwrap();
        assert!(matches!(
            load_toml_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
        assert_eq!(load_config_file(&path), PartialConfig::default());
    }

    #[test]
    fn env_layer_ignores_empty_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_MODEL, ""),
            (ENV_HISTORY_FILE, "/tmp/hist"),
            (ENV_LLM_API_KEY, "env-key"),
            (ENV_LLM_BASE_URL, ""),
        ]);
        let partial = env_to_partial(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(partial.model, None);
        assert_eq!(partial.history_file, Some(PathBuf::from("/tmp/hist")));
        assert_eq!(partial.llm_api_key.as_deref(), Some("env-key"));
        assert_eq!(partial.llm_base_url, None);
    }

    #[test]
    fn base_url_without_model_is_rejected() {
        let config = PartialConfig {
            llm_base_url: Some("http://localhost:11434/v1".into()),
            ..Default::default()
        }
        .finalize(PathBuf::from("."));
        assert!(matches!(check(&config), Err(ConfigError::Invalid(_))));

        let config = PartialConfig {
            model: Some("llama3.2".into()),
            llm_base_url: Some("http://localhost:11434/v1".into()),
            ..Default::default()
        }
        .finalize(PathBuf::from("."));
        assert!(check(&config).is_ok());
    }

    #[test]
    fn cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpsh.toml");
        std::fs::write(&path, "[llm]\nmodel = \"file-model\"\n[server]\nconnect = [\"a\"]\n")
            .unwrap();

        let cli = Cli::parse_from([
            "mcpsh",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "cli-model",
            "b",
        ]);
        let merged = cli_to_partial(&cli).with_fallback(load_config_file(&path));
        assert_eq!(merged.model.as_deref(), Some("cli-model"));
        assert_eq!(merged.server, Some(vec!["b".to_string()]));
    }
}
