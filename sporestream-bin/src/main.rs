use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sporestream_core::{
    config::Config,
    consumer::StreamConsumer,
    conversation::ConversationStatus,
    decoder::PayloadSchema,
    model::{ChatMessage, StreamRequest},
    probe::probe,
    session::ChatSession,
    stream::{Status, StreamEvent},
    telemetry::TracingSink,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://localhost:3000/api/ai/stream";

#[derive(Parser)]
#[command(author, version, about = "Stream AI chat replies from an SSE endpoint", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// Endpoint URL; overrides the config file. Falls back to $SPORESTREAM_URL.
    #[arg(long)]
    url: Option<String>,
    /// JSON or TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply as it streams
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Agent name sent with the request")]
        agent: Option<String>,
        #[arg(long, help = "Payload schema: typed, openai or ai_sdk")]
        schema: Option<PayloadSchema>,
        #[arg(long, help = "Conversation id, sent as X-Conversation-Id")]
        conversation: Option<String>,
        #[command(flatten)]
        target: Target,
    },
    /// Check that the endpoint answers and starts streaming
    Probe {
        #[command(flatten)]
        target: Target,
    },
}

fn load_config(target: &Target) -> anyhow::Result<Config> {
    let mut cfg = match &target.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::for_url(
            std::env::var("SPORESTREAM_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()),
        ),
    };
    if let Some(url) = &target.url {
        cfg.endpoint.url = url.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            message,
            agent,
            schema,
            conversation,
            target,
        } => {
            let mut cfg = load_config(&target)?;
            if let Some(schema) = schema {
                cfg.stream.schema = schema;
            }
            let mut session = ChatSession::from_config(&cfg)?.with_sink(Arc::new(TracingSink));
            if let Some(id) = conversation {
                session = session.with_conversation_id(id);
            }

            let mut req = StreamRequest::new(vec![ChatMessage::user(message)]);
            if let Some(agent) = agent {
                req = req.with_agent(agent);
            }
            session.start(req).await?;

            let mut saw_delta = false;
            while let Some(ev) = session.next_event().await {
                match ev {
                    StreamEvent::Status(Status::Done) | StreamEvent::Complete => {}
                    StreamEvent::Status(s) => eprintln!("[{}]", s.as_str()),
                    StreamEvent::Content(txt) => {
                        saw_delta = true;
                        print!("{txt}");
                        io::stdout().flush().ok();
                    }
                    StreamEvent::Error(err) => {
                        if saw_delta {
                            println!();
                        }
                        eprintln!("[error: {}: {}]", err.kind.as_str(), err.message);
                    }
                }
            }
            if saw_delta && session.state().status() == ConversationStatus::Done {
                println!();
            }
            if session.state().status() == ConversationStatus::Error {
                std::process::exit(1);
            }
        }
        Commands::Probe { target } => {
            let cfg = load_config(&target)?;
            let consumer = StreamConsumer::from_config(&cfg)?;
            let req = StreamRequest::new(vec![ChatMessage::user("Hello, this is a test message")])
                .with_agent("test");
            let report = probe(&consumer, &req).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
