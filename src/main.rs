use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};

use voice_agent::{
    email_registry, init_tracing, provider_from_config, release, AppConfig, EmailSummaryBot,
    McpServer, TelegramApi, VoiceAgent, VoiceAgentError,
};

#[derive(Parser)]
#[command(
    name = "voice-agent",
    about = "Telegram assistant that summarizes recent email as text or audio",
    version
)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot (long polling)
    Bot,

    /// Run one agentic query and print the answer
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Write generated audio here as MP3
        #[arg(long)]
        audio_out: Option<PathBuf>,
    },

    /// Serve the tool/prompt registry on stdio, or over HTTP with --http
    Registry {
        #[arg(long)]
        http: Option<SocketAddr>,
    },

    /// List the tools and prompts the registry exposes
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Registry { http } => {
            let server = McpServer::new(email_registry(&cfg));
            match http {
                Some(addr) => Arc::new(server).serve_http(addr).await?,
                None => server.serve_stdio().await?,
            }
        }
        Commands::Bot => {
            let sessions = provider_from_config(&cfg, cli.config.as_deref())?;
            let agent = Arc::new(VoiceAgent::from_config(&cfg, sessions)?);
            let api = Arc::new(TelegramApi::from_config(&cfg.telegram)?);
            tracing::info!("starting Telegram bot");
            EmailSummaryBot::new(agent, api.clone()).run_polling(api).await?;
        }
        Commands::Ask { query, audio_out } => {
            let sessions = provider_from_config(&cfg, cli.config.as_deref())?;
            let agent = VoiceAgent::from_config(&cfg, sessions)?;
            let (text, audio) = agent.run_agentic_query(&query.join(" ")).await?.into_parts();
            println!("{text}");

            match (audio, audio_out) {
                (Some(audio), Some(path)) => {
                    let bytes = STANDARD.decode(audio.trim()).context("decoding audio")?;
                    tokio::fs::write(&path, bytes)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("audio written to {}", path.display());
                }
                (Some(_), None) => eprintln!("audio generated; pass --audio-out to save it"),
                (None, _) => {}
            }
        }
        Commands::Inspect => {
            let sessions = provider_from_config(&cfg, cli.config.as_deref())?;
            let mut session = sessions.open().await?;
            let listed = async {
                let tools = session.list_tools().await?;
                let prompts = session.list_prompts().await?;
                Ok::<_, VoiceAgentError>((tools, prompts))
            }
            .await;
            let (tools, prompts) = release(session, listed).await?;

            println!("tools:");
            for tool in tools {
                println!("  {:<24} {}", tool.name, tool.description.as_deref().unwrap_or(""));
            }
            println!("prompts:");
            for prompt in prompts {
                let args: Vec<_> = prompt.arguments.iter().map(|a| a.name.as_str()).collect();
                println!("  {:<36} ({})", prompt.name, args.join(", "));
            }
        }
    }

    Ok(())
}
