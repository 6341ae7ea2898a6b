use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mcpsh::agent::{ChatCompletion, GenaiCompletion, LlmEndpoint};
use mcpsh::cli::Cli;
use mcpsh::config;
use mcpsh::session::McpConnector;
use mcpsh::shell::{Outcome, Shell, ShellOptions, repl};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing on stderr so pipeline output stays clean
    let filter = EnvFilter::try_from_env("MCPSH_LOG")
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = config::load_config(&cli)?;
    tracing::info!(
        model = config.model.as_deref().unwrap_or("(none)"),
        base_url = config.llm_base_url.as_deref().unwrap_or("(provider default)"),
        context_file = %config.context_file.display(),
        "Config loaded"
    );

    let endpoint = LlmEndpoint {
        base_url: config.llm_base_url.clone(),
        api_key: config.llm_api_key.clone(),
    };
    let completion = config.model.as_deref().map(|model| {
        Arc::new(GenaiCompletion::new(model, endpoint)) as Arc<dyn ChatCompletion>
    });
    let connector = McpConnector::with_headers(&config.headers)?;

    let shell = Arc::new(Shell::new(
        ShellOptions {
            context_file: config.context_file.clone(),
            model: config.model.clone(),
        },
        Arc::new(connector),
        completion,
    ));

    if let Some((target, args)) = config.server.split_first() {
        match shell.connector().connect(target, args).await {
            Ok(provider) => {
                tracing::info!(server = %provider.target(), "Connected at startup");
                shell.attach(provider);
            }
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    match cli.exec {
        Some(line) => {
            let outcome = shell.execute_interruptible(&line).await;
            let failed = matches!(outcome, Outcome::Failed(_));
            repl::report(outcome);
            shell.close_session().await;
            if failed {
                std::process::exit(1);
            }
        }
        None => repl::run(shell, &config.history_file).await?,
    }

    Ok(())
}
