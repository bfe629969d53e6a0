use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::config::{self, PasteMode};

const CLI_EXAMPLES: &str = "Examples:\n\
  sonar-cli chat\n\
  sonar-cli chat --resume 3kTq9vXz1p\n\
  sonar-cli ask \"What is the tallest building in Europe?\"\n\
  sonar-cli ask --follow-up 3kTq9vXz1p \"How tall is it exactly?\"\n\
  sonar-cli list --limit 10\n\
\n\
Inside chat, use /help for the command reference and /exit to quit.";

#[derive(Debug, Parser)]
#[command(name = "sonar-cli")]
#[command(about = "Terminal chat client for the Perplexity Sonar search API")]
#[command(version)]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "PERPLEXITY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "SONAR_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "SONAR_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "SONAR_DATA_DIR")]
    pub data_dir: Option<String>,

    #[arg(long, env = "SONAR_CONFIG")]
    pub config_path: Option<String>,

    #[arg(long, env = "SONAR_PASTE_MODE", value_enum)]
    pub paste_mode: Option<PasteMode>,

    /// Disable colors and markdown formatting.
    #[arg(long, default_value_t = false)]
    pub plain: bool,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run interactive chat mode (the default)")]
    Chat {
        /// Resume a saved conversation by id.
        #[arg(long)]
        resume: Option<String>,
    },
    #[command(about = "Ask a one-shot question and print the streamed answer")]
    Ask {
        prompt: Vec<String>,
        /// Continue a saved conversation instead of starting a new one.
        #[arg(long)]
        follow_up: Option<String>,
    },
    #[command(about = "List saved conversations")]
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn command_label(command: &Option<Commands>) -> &'static str {
    match command {
        None | Some(Commands::Chat { .. }) => "chat",
        Some(Commands::Ask { .. }) => "ask",
        Some(Commands::List { .. }) => "list",
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;

    let config_path = cli
        .config_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let file = config::load_config_file(&config_path)?;
    let cfg = config::resolve_runtime_config(&cli, &file);
    tracing::debug!(
        command = command_label(&cli.command),
        model = %cfg.model,
        data_dir = %cfg.data_dir.display(),
        "resolved runtime config"
    );

    match cli.command {
        None => crate::chat::run_chat(&cfg, None).await,
        Some(Commands::Chat { resume }) => crate::chat::run_chat(&cfg, resume).await,
        Some(Commands::Ask { prompt, follow_up }) => {
            crate::query::run_query(&cfg, prompt, follow_up).await
        }
        Some(Commands::List { limit }) => crate::query::run_list(&cfg, limit).await,
    }
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
