use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::SonarClient;
use crate::clipboard::SystemClipboard;
use crate::config::{RuntimeConfig, require_api_key};
use crate::input::InputReceiver;
use crate::render::{RenderOptions, Renderer};
use crate::session::{Session, SessionDeps};
use crate::store::{ConversationStore, ConversationSummary};

pub const LIST_MAX_ITEMS: usize = 20;

pub const HELP_TEXT: &str = "Available commands:\n\
  /help         Show this help message\n\
  /list         List saved conversations\n\
  /resume <id>  Resume a saved conversation\n\
  /clear        Start a new conversation\n\
  /delete <id>  Delete a saved conversation\n\
  /copy         Copy the last response to the clipboard\n\
  /exit         Exit the application";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    List,
    Resume(String),
    Clear,
    Delete(String),
    Copy,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    NotACommand,
    Command(SlashCommand),
    MissingArgument { usage: &'static str },
    Unknown(String),
}

/// Classify a single-line submission starting with `/`. The command is the
/// first whitespace-separated token, including the slash.
pub fn parse_command(input: &str) -> ParsedCommand {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return ParsedCommand::NotACommand;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("");

    match command {
        "/help" => ParsedCommand::Command(SlashCommand::Help),
        "/list" => ParsedCommand::Command(SlashCommand::List),
        "/resume" => {
            if arg.is_empty() {
                ParsedCommand::MissingArgument {
                    usage: "Usage: /resume <id>",
                }
            } else {
                ParsedCommand::Command(SlashCommand::Resume(arg.to_string()))
            }
        }
        "/clear" => ParsedCommand::Command(SlashCommand::Clear),
        "/delete" => {
            if arg.is_empty() {
                ParsedCommand::MissingArgument {
                    usage: "Usage: /delete <id>",
                }
            } else {
                ParsedCommand::Command(SlashCommand::Delete(arg.to_string()))
            }
        }
        "/copy" => ParsedCommand::Command(SlashCommand::Copy),
        "/exit" => ParsedCommand::Command(SlashCommand::Exit),
        other => ParsedCommand::Unknown(other.to_string()),
    }
}

/// Format conversation summaries as an aligned table, newest first, capped
/// at `limit` rows.
pub fn format_summary_table(summaries: &[ConversationSummary], limit: usize) -> String {
    let displayed = &summaries[..summaries.len().min(limit.max(1))];

    let id_width = displayed
        .iter()
        .map(|s| s.id.chars().count())
        .chain([2])
        .max()
        .unwrap_or(2);
    let title_width = displayed
        .iter()
        .map(|s| s.title.chars().count())
        .chain([5])
        .max()
        .unwrap_or(5);

    let header = format!("{:<id_width$}  {:<title_width$}  Last Updated", "ID", "Title");
    let separator = "-".repeat(header.chars().count());
    let mut out = format!("{header}\n{separator}");

    for summary in displayed {
        let date = summary
            .updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M");
        out.push_str(&format!(
            "\n{:<id_width$}  {:<title_width$}  {date}",
            summary.id, summary.title
        ));
    }

    out
}

/// Entry point for interactive chat: wire the real collaborators together
/// and hand control to the session.
pub async fn run_chat(cfg: &RuntimeConfig, resume: Option<String>) -> Result<()> {
    let api_key = require_api_key(cfg)?;
    let client = Arc::new(SonarClient::new(cfg, api_key)?);
    let store = ConversationStore::new(cfg.data_dir.clone());
    store.ensure_directory().await?;

    let conversation = match resume {
        Some(id) => Some(
            store
                .load(&id)
                .await
                .with_context(|| format!("conversation not found: {id}"))?,
        ),
        None => None,
    };

    tracing::info!(model = %cfg.model, data_dir = %cfg.data_dir.display(), "starting chat session");

    let session = Session::new(SessionDeps {
        client,
        store,
        renderer: Renderer::new(std::io::stdout(), RenderOptions::from_config(cfg)),
        input: InputReceiver::from_stdin(),
        clipboard: Arc::new(SystemClipboard),
        paste_mode: cfg.paste_mode,
        model: cfg.model.clone(),
        conversation,
    });

    session.run().await
}
