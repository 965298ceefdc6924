//! Parley CLI - interactive tool-augmented chat
//!
//! Reads prompts at a line editor and runs each one as a turn of the
//! orchestration loop. Tools come from the built-in registry or from an
//! MCP server launched with `--server`.

mod commands;

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use console::style;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use commands::ReplCommand;
use parley_core::completion::{CompletionClient, GenAiClient, ScriptedClient};
use parley_core::config::{Config, ConfigManager, McpConfig};
use parley_core::error::Error;
use parley_core::orchestration::OrchestrationLoop;
use parley_core::tools::builtin_registry;
use parley_core::transport::{InProcessTransport, McpTransport, ToolTransport};

#[derive(Parser)]
#[command(name = "parley")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with a model that can call tools", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// LLM provider (openai, anthropic, gemini, ...)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// MCP server command; arguments for it follow `--`
    #[arg(long, value_name = "CMD")]
    server: Option<String>,

    #[arg(last = true, value_name = "ARGS")]
    server_args: Vec<String>,

    /// Completion requests allowed per turn
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Run a batch of tool calls concurrently
    #[arg(long)]
    parallel_tools: bool,

    /// Use the local echo client instead of a provider
    #[arg(long)]
    offline: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let config = load_config(&cli)?;
    config.orchestration.validate()?;

    let transport = build_transport(&cli, &config).await?;
    let client: Arc<dyn CompletionClient> = if cli.offline {
        Arc::new(ScriptedClient::echo())
    } else {
        if config.provider.get_api_key().is_none() {
            eprintln!(
                "{}",
                style(format!("Warning: no API key configured for {}", config.provider.provider_type)).yellow()
            );
        }
        Arc::new(GenAiClient::new(&config.provider))
    };

    let mut lp = match OrchestrationLoop::new(client, transport.clone(), config.orchestration.clone()) {
        Ok(lp) => lp,
        Err(e) => {
            shutdown_transport(transport.as_ref()).await;
            return Err(e.into());
        }
    };

    let outcome = run_repl(&mut lp).await;
    shutdown_transport(transport.as_ref()).await;
    outcome
}

/// Shut the tool transport down, logging a failure. Returns whether it was clean.
async fn shutdown_transport(transport: &dyn ToolTransport) -> bool {
    match transport.shutdown().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Tool transport shutdown failed: {}", e);
            false
        }
    }
}

/// Install the subscriber; the returned guard flushes the file sink on drop
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let directives = if verbose { "info,parley_core=debug,parley_mcp=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

/// Config file values with command line overrides applied
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .context("Failed to load configuration")?;
    let mut config = manager.into_config();

    if let Some(provider) = &cli.provider {
        config.provider.switch_provider(provider);
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.orchestration.max_rounds = max_rounds;
    }
    if cli.parallel_tools {
        config.orchestration.parallel_tools = true;
    }
    if let Some(command) = &cli.server {
        config.mcp = Some(McpConfig::new(command.clone(), cli.server_args.clone()));
    }

    Ok(config)
}

async fn build_transport(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn ToolTransport>> {
    let timeout = config.orchestration.tool_timeout();

    match &config.mcp {
        Some(mcp) => {
            let transport = McpTransport::spawn(mcp, timeout)
                .await
                .with_context(|| format!("Failed to start tool server '{}'", mcp.command))?;
            if cli.verbose {
                println!(
                    "{} {} ({} tools)",
                    style("Connected to").dim(),
                    style(transport.server_name()).cyan(),
                    transport.list_schemas().len()
                );
            }
            Ok(Arc::new(transport))
        }
        None => Ok(Arc::new(InProcessTransport::new(builtin_registry()?).with_timeout(timeout))),
    }
}

async fn run_repl(lp: &mut OrchestrationLoop) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;

    println!("{} {}", style("Parley").bold(), style(format!("({})", lp.model())).dim());
    println!(
        "{}",
        style("Type a question, or: tools, history, debug, clear, quit").dim()
    );

    loop {
        let line = tokio::task::block_in_place(|| editor.readline(&format!("{} ", style(">").cyan())));
        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", style("(type quit to exit)").dim());
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::Clear => {
                lp.clear_history();
                println!("{}", style("History cleared").dim());
            }
            ReplCommand::History => {
                if lp.history().is_empty() {
                    println!("{}", style("No messages yet").dim());
                } else {
                    print!("{}", lp.history().render_summary());
                }
            }
            ReplCommand::Debug => match lp.history().to_debug_json() {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("{}", style(format!("Error: {}", e)).red()),
            },
            ReplCommand::Tools => show_tools(lp),
            ReplCommand::Prompt(text) => {
                let _ = editor.add_history_entry(&text);
                if run_prompt(lp, &text).await.is_break() {
                    eprintln!("{}", style("Tool session lost, exiting").red());
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Run one turn; Ctrl-C cancels it. Breaks when the tool session is unusable.
async fn run_prompt(lp: &mut OrchestrationLoop, text: &str) -> ControlFlow<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = lp.run_turn_cancellable(text, &cancel).await;
    watcher.abort();

    match result {
        Ok(answer) => println!("\n{}: {}\n", style("Assistant").bold().green(), answer),
        Err(Error::Cancelled) => println!("{}", style("Cancelled").yellow()),
        Err(e @ Error::Protocol(_)) => {
            eprintln!("{}", style(format!("Error: {}", e)).red());
            return ControlFlow::Break(());
        }
        Err(e) => eprintln!("{}", style(format!("Error: {}", e)).red()),
    }
    ControlFlow::Continue(())
}

fn show_tools(lp: &OrchestrationLoop) {
    println!("{}", style("Available Tools:").bold());
    println!();
    for schema in lp.tool_schemas() {
        println!("  {} - {}", style(&schema.name).cyan(), schema.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::completion::CompletionOutcome;
    use parley_core::config::OrchestrationConfig;
    use parley_core::conversation::ToolCallRequest;
    use parley_core::error::ToolError;
    use parley_core::tools::ToolSchema;
    use serde_json::Value;
    use tempfile::TempDir;

    /// Transport whose server already went away
    struct Gone;

    #[async_trait]
    impl ToolTransport for Gone {
        fn list_schemas(&self) -> Vec<ToolSchema> {
            Vec::new()
        }

        async fn invoke(&self, _name: &str, _arguments: Value) -> Result<Value, ToolError> {
            Err(ToolError::Protocol("Broken pipe".to_string()))
        }

        async fn shutdown(&self) -> Result<(), ToolError> {
            Err(ToolError::Protocol("Broken pipe".to_string()))
        }
    }

    fn parse(dir: &TempDir, args: &[&str]) -> Cli {
        let config = dir.path().join("config.toml");
        let mut argv = vec!["parley", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_provider_flag_brings_its_default_model() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&parse(&dir, &["--provider", "anthropic"])).unwrap();

        assert_eq!(config.provider.provider_type, "anthropic");
        assert_eq!(config.provider.model, "claude-3-5-haiku-latest");
        assert!(config.provider.api_key_env.is_none());
    }

    #[test]
    fn test_model_flag_wins_over_provider_default() {
        let dir = TempDir::new().unwrap();
        let cli = parse(&dir, &["--provider", "anthropic", "--model", "claude-sonnet-4-5"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.provider.model, "claude-sonnet-4-5");
    }

    #[test]
    fn test_server_flag_with_trailing_args() {
        let dir = TempDir::new().unwrap();
        let cli = parse(&dir, &["--max-rounds", "3", "--server", "parley-weather", "--", "--quiet"]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.orchestration.max_rounds, 3);
        let mcp = config.mcp.unwrap();
        assert_eq!(mcp.command, "parley-weather");
        assert_eq!(mcp.args, vec!["--quiet".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_failure_is_reported_not_raised() {
        assert!(!shutdown_transport(&Gone).await);

        let in_process = InProcessTransport::new(builtin_registry().unwrap());
        assert!(shutdown_transport(&in_process).await);
    }

    #[tokio::test]
    async fn test_lost_tool_session_stops_the_repl() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionOutcome::tool_calls(vec![
            ToolCallRequest::new("call_1", "get_alerts", serde_json::json!({ "state": "CA" })),
        ]))]));
        let mut lp = OrchestrationLoop::new(client, Arc::new(Gone), OrchestrationConfig::default()).unwrap();

        assert!(run_prompt(&mut lp, "Any alerts in CA?").await.is_break());
    }

    #[tokio::test]
    async fn test_turn_errors_keep_the_repl_going() {
        // An exhausted script is a malformed completion, not a tool session failure
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let mut lp = OrchestrationLoop::new(client, Arc::new(Gone), OrchestrationConfig::default()).unwrap();

        assert!(run_prompt(&mut lp, "hello").await.is_continue());
    }
}
