//! threadwise
//!
//! Ask grounded questions over archived forum threads. `knowledge ingest`
//! builds the corpus index, `ask` answers from it, `decode` renders a raw
//! response stream captured with `ask --raw`.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AskCommand, DecodeCommand, KnowledgeCommand};
use std::path::PathBuf;
use threadwise_core::{config::AppConfig, logging, AppResult};

/// Grounded answers from archived forum discussions
#[derive(Parser, Debug)]
#[command(name = "threadwise", version, long_about = None)]
struct Cli {
    /// Workspace holding `.threadwise/` (defaults to the current directory)
    #[arg(short, long, global = true, env = "THREADWISE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// YAML config file used instead of `.threadwise/config.yaml`
    #[arg(short, long, global = true, env = "THREADWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `warn` or `threadwise_knowledge=debug`
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Shorthand for `--log-level debug`
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Plain log output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Chat backend: ollama or gemini
    #[arg(short, long, global = true, env = "THREADWISE_PROVIDER")]
    provider: Option<String>,

    /// Chat model; defaults to the backend's usual model
    #[arg(short, long, global = true, env = "THREADWISE_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a question from the indexed threads
    Ask(AskCommand),

    /// Build, inspect or delete the corpus index
    Knowledge(KnowledgeCommand),

    /// Render a raw response stream read from stdin
    Decode(DecodeCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Ask(_) => "ask",
            Self::Knowledge(_) => "knowledge",
            Self::Decode(_) => "decode",
        }
    }

    async fn run(self, config: &AppConfig) -> AppResult<()> {
        match self {
            Self::Ask(cmd) => cmd.execute(config).await,
            Self::Knowledge(cmd) => cmd.execute(config).await,
            Self::Decode(cmd) => cmd.execute().await,
        }
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.workspace.clone(), cli.config.clone())?.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::debug!(
        workspace = ?config.workspace,
        provider = %config.provider,
        model = %config.model,
        embedding_provider = %config.embedding_provider,
        embedding_model = %config.embedding_model,
        "Configuration resolved"
    );
    config.ensure_threadwise_dir()?;

    let name = cli.command.name();
    let _span = tracing::info_span!("command", name).entered();

    let result = cli.command.run(&config).await;
    if let Err(e) = &result {
        tracing::error!("{} failed: {}", name, e);
    } else {
        tracing::debug!("{} finished", name);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommand_names() {
        let cli = Cli::try_parse_from(["threadwise", "decode", "--framing", "length-prefixed"])
            .unwrap();
        assert_eq!(cli.command.name(), "decode");

        let cli = Cli::try_parse_from(["threadwise", "knowledge", "stats", "--json"]).unwrap();
        assert_eq!(cli.command.name(), "knowledge");
    }
}
