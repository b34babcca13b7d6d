use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use sales_agent::config::AgentConfig;
use sales_agent::leads::LeadRegistry;
use sales_agent::llm::{LlmConfig, create_provider, generate_reply};
use sales_agent::mailbox::{GmailConfig, GmailMailbox, Mailbox};
use sales_agent::pipeline::PollLoop;
use sales_agent::prompts::PromptTemplates;
use sales_agent::store::{Database, LibSqlBackend};

#[derive(Debug, Parser)]
#[command(name = "sales-agent", version, about = "Automated email sales replies and follow-ups")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the mailbox, answer leads and send follow-ups (default)
    Run,
    /// Delete every lead and its conversation history
    ClearLeads,
    /// Send one prompt to the configured model and print the answer
    CheckLlm {
        #[arg(default_value = "Hello, how can you assist me with sales?")]
        prompt: String,
    },
}

/// Install the tracing subscriber. The returned guard flushes the log file on drop.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false);

    match std::env::var("SALES_AGENT_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "sales-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_target(false).with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn open_store(config: &AgentConfig) -> anyhow::Result<Arc<dyn Database>> {
    let db = LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();
    let cli = Cli::parse();
    let config = AgentConfig::from_env();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => Ok(run(config).await?),
        Command::ClearLeads => {
            let store = open_store(&config).await?;
            let removed = LeadRegistry::new(store).clear_all().await?;
            eprintln!("Removed {removed} lead(s) and their conversations");
            Ok(())
        }
        Command::CheckLlm { prompt } => {
            let llm = create_provider(&LlmConfig::from_env()?)?;
            let reply = generate_reply(llm.as_ref(), &prompt, config.max_reply_tokens).await?;
            println!("Response from {}:\n{reply}", llm.model_name());
            Ok(())
        }
    }
}

async fn run(config: AgentConfig) -> sales_agent::error::Result<()> {
    eprintln!("📬 Sales Agent v{}", env!("CARGO_PKG_VERSION"));

    let llm_config = LlmConfig::from_env()?;
    let llm = create_provider(&llm_config)?;

    let mailbox: Arc<dyn Mailbox> = Arc::new(GmailMailbox::new(GmailConfig::from_env()?)?);
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    let prompts = PromptTemplates::load(
        config.reply_prompt_path.as_deref(),
        config.followup_prompt_path.as_deref(),
    )?;

    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Inbox query: {}", config.inbox_query);
    eprintln!(
        "   Follow-up after: {}s idle",
        config.followup_idle_threshold.as_secs()
    );

    let agent = PollLoop::bootstrap(config, store, mailbox, llm, prompts).await?;

    tokio::select! {
        _ = agent.run() => {}
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        },
    }
    Ok(())
}
