use babbler::config::{self, BabblerConfig};
use babbler::engine::Engine;
use babbler::gateway;
use babbler::sampling::StdRandomness;
use babbler::store;
use babbler::types::{ConversationId, IncomingMessage};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "babbler")]
#[command(about = "A chat companion that learns word chains per conversation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Auth token (required for non-loopback)
        #[arg(long, env = "BABBLER_TOKEN")]
        token: Option<String>,
    },

    /// Talk to the bot on stdin; every line counts as a reply to the bot
    Chat {
        #[arg(short, long, default_value_t = 1)]
        conversation: ConversationId,
    },

    /// Learn every line of a text file into a conversation
    Ingest {
        #[arg(short, long, default_value_t = 1)]
        conversation: ConversationId,

        /// Path to a UTF-8 text file
        path: String,
    },

    /// Show runtime status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = config::load()?;

    match cli.command {
        Commands::Serve { port, bind, token } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            gateway::run(config, token).await
        }
        Commands::Chat { conversation } => chat(&config, conversation).await,
        Commands::Ingest { conversation, path } => ingest(&config, conversation, &path).await,
        Commands::Status => {
            let stores = store::open(&config.store, config.policy.default_reply_chance).await?;
            println!("babbler v{}", env!("CARGO_PKG_VERSION"));
            println!("store: {}", config.store.backend);
            println!("conversations: {}", stores.conversations.count().await?);
            Ok(())
        }
    }
}

async fn build_engine(config: &BabblerConfig) -> anyhow::Result<(Engine, store::Stores)> {
    let stores = store::open(&config.store, config.policy.default_reply_chance).await?;
    let engine = Engine::from_config(config, &stores, Arc::new(StdRandomness::from_os()));
    Ok((engine, stores))
}

async fn chat(config: &BabblerConfig, conversation: ConversationId) -> anyhow::Result<()> {
    let (engine, _stores) = build_engine(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let message = IncomingMessage {
            is_reply_to_bot: true,
            ..IncomingMessage::text(conversation, line)
        };
        let outcome = engine.handle(&message).await?;
        if let Some(reply) = outcome.reply {
            stdout.write_all(format!("{reply}\n").as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn ingest(config: &BabblerConfig, conversation: ConversationId, path: &str) -> anyhow::Result<()> {
    if config.store.backend == "memory" {
        warn!("memory store in use: ingested chains are lost when the process exits");
    }
    let (engine, stores) = build_engine(config).await?;
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {path}: {e}"))?;

    let mut messages = 0usize;
    let mut failed = 0usize;
    for line in content.lines().filter(|l| !l.is_empty()) {
        let message = IncomingMessage::text(conversation, line);
        let report = engine.learner().learn(conversation, &message.tokens()).await;
        messages += 1;
        failed += report.failed;
    }

    let stats = stores.chain.stats(conversation).await?;
    println!(
        "learned {messages} lines into conversation {conversation}: {} pairs, {} replies, {} failed windows",
        stats.pairs, stats.replies, failed
    );
    Ok(())
}
