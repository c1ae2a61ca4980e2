use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use unifai_agent::{Agent, OpenAiCompatProvider, Tools, WorldAgent};
use unifai_agent::{HistoryClassifier, ModelMap, PromptStore};
use unifai_core::protocol::Caller;
use unifai_core::{Action, ActionContext, ApiClient, Config};
use unifai_mcp::McpServer;
use unifai_toolkit::{SmartBuilding, Toolkit};

/// UnifAI network client
#[derive(Parser, Debug)]
#[command(name = "unifai", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.unifai/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve a toolkit with an `echo` action
    ServeToolkit {
        /// Update the toolkit's name before serving
        #[arg(long)]
        name: Option<String>,
        /// Update the toolkit's description before serving
        #[arg(long)]
        description: Option<String>,
    },
    /// Serve a smart building with an `echo` action
    ServeBuilding {
        #[arg(long)]
        building_id: i64,
    },
    /// Chat with the agent. Reads messages from stdin when none is given.
    Chat {
        message: Option<String>,
        /// Conversation to continue (a new one by default)
        #[arg(long)]
        chat_id: Option<String>,
    },
    /// Score how much a message depends on earlier conversation
    Classify { message: String },
    /// Search platform services
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Join the world as an autonomous player
    Play {
        #[arg(long)]
        name: String,
    },
    /// Serve service search and invocation as MCP tools over stdio
    Mcp,
}

/// Load config. Commands that never talk to the platform skip validation so
/// they work without a platform API key.
fn load_config(path: Option<&Path>, platform: bool) -> Result<Config> {
    if platform {
        return Ok(Config::load(path)?);
    }
    let mut config = match path {
        Some(p) => Config::from_file(p)?,
        None => match unifai_core::config::default_config_path() {
            Some(p) if p.exists() => Config::from_file(&p)?,
            _ => Config::default(),
        },
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn echo_action() -> Action {
    Action::new("echo", |ctx: ActionContext, payload: Value| async move {
        let who = match &ctx.caller {
            Caller::Agent(id) => format!("agent {}", id),
            Caller::Player(id) => format!("player {}", id),
            Caller::Unknown => "someone".to_string(),
        };
        let said = payload.get("content").and_then(Value::as_str).unwrap_or_default();
        Ok::<_, anyhow::Error>(ctx.result(json!({
            "content": format!("You are {}, you said: {}", who, said)
        })))
    })
    .description("Echo the message")
    .payload(json!({
        "content": {"type": "string", "required": true}
    }))
}

fn platform_tools(config: &Config) -> Tools {
    let api = ApiClient::new(config.api_key.clone(), config.api_endpoint.clone());
    Tools::new(Arc::new(api))
}

/// Cancel the returned token on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
        trigger.cancel();
    });
    token
}

async fn chat(config: &Config, message: Option<String>, chat_id: Option<String>) -> Result<()> {
    let agent = Agent::from_config(config)?;
    let chat_id = chat_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Chat {}", chat_id);

    if let Some(message) = message {
        println!("{}", agent.process_message(&chat_id, &message).await?);
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match agent.process_message(&chat_id, line).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => warn!("{:#}", e),
            }
        }
    }

    let day = agent.usage().stats(Some(24));
    info!("Used {} input / {} output tokens", day.input_tokens, day.output_tokens);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::ServeToolkit { name, description } => {
            let config = load_config(config_path, true)?;
            let toolkit = Toolkit::from_config(&config).action(echo_action());
            if name.is_some() || description.is_some() {
                let updated = toolkit
                    .update_toolkit(name, description)
                    .await
                    .context("failed to update toolkit")?;
                info!("Toolkit updated: {}", updated);
            }
            toolkit.run(shutdown_on_ctrl_c()).await
        }
        Commands::ServeBuilding { building_id } => {
            let config = load_config(config_path, true)?;
            SmartBuilding::from_config(&config, building_id)
                .action(echo_action())
                .run(shutdown_on_ctrl_c())
                .await
        }
        Commands::Chat { message, chat_id } => {
            let config = load_config(config_path, true)?;
            chat(&config, message, chat_id).await
        }
        Commands::Classify { message } => {
            let config = load_config(config_path, false)?;
            let provider = OpenAiCompatProvider::from_config(&config.llm)?;
            let classifier = HistoryClassifier::new(
                Arc::new(provider),
                Arc::new(PromptStore::new()),
                Arc::new(ModelMap::with_default(config.llm.model.clone())),
            );
            let score = classifier.score(&message).await?;
            println!("{}", score);
            Ok(())
        }
        Commands::Search { query, limit } => {
            let config = load_config(config_path, true)?;
            let found = platform_tools(&config)
                .call_tool(
                    unifai_agent::tools::SEARCH_SERVICES,
                    &json!({ "query": query, "limit": limit }),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(())
        }
        Commands::Play { name } => {
            let config = load_config(config_path, true)?;
            WorldAgent::from_config(&config, name)?
                .run(shutdown_on_ctrl_c())
                .await
        }
        Commands::Mcp => {
            let config = load_config(config_path, true)?;
            McpServer::new(platform_tools(&config)).serve_stdio().await
        }
    }
}
