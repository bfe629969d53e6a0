use std::io::IsTerminal;

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;

use crate::api::{ChatClient, SearchResult, SonarClient, StreamEvent, classify_api_error};
use crate::chat::format_summary_table;
use crate::config::{RuntimeConfig, require_api_key};
use crate::render::{RenderOptions, Renderer};
use crate::session::cited_sources;
use crate::store::{Conversation, ConversationStore, Role, history_turns};

/// One-shot question: stream the answer, render cited sources, persist the
/// exchange, and print a follow-up hint.
pub async fn run_query(
    cfg: &RuntimeConfig,
    prompt: Vec<String>,
    follow_up: Option<String>,
) -> Result<()> {
    let api_key = require_api_key(cfg)?;
    let question = resolve_question(prompt).await?;

    let client = SonarClient::new(cfg, api_key)?;
    let store = ConversationStore::new(cfg.data_dir.clone());
    store.ensure_directory().await?;

    let mut conversation = match follow_up {
        Some(id) => store
            .load(&id)
            .await
            .with_context(|| format!("conversation not found: {id}"))?,
        None => store.create(&question).await?,
    };
    store.add_message(&mut conversation, Role::User, &question, Vec::new());

    let mut renderer = Renderer::new(std::io::stdout(), RenderOptions::from_config(cfg));

    match stream_answer(&client, &store, &mut conversation, &mut renderer).await {
        Ok(()) => {
            renderer.info(&format!(
                "\nFollow up: sonar-cli ask --follow-up {} \"your question\"",
                conversation.id
            ))?;
            Ok(())
        }
        Err(err) => {
            renderer.assistant_end("")?;
            bail!("{}", classify_api_error(&err));
        }
    }
}

async fn stream_answer(
    client: &SonarClient,
    store: &ConversationStore,
    conversation: &mut Conversation,
    renderer: &mut Renderer<std::io::Stdout>,
) -> Result<()> {
    let mut stream = client.stream_chat(history_turns(conversation)).await?;
    let mut response = String::new();
    let mut results: Vec<SearchResult> = Vec::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Token(token) => {
                renderer.assistant_token(&token)?;
                response.push_str(&token);
            }
            StreamEvent::Sources(found) => results = found,
        }
    }

    renderer.assistant_end(&response)?;

    let cited = cited_sources(&response, &results);
    if !cited.is_empty() {
        renderer.sources(&cited)?;
    }

    let sources = cited
        .iter()
        .map(|s| SearchResult {
            title: s.title.clone(),
            url: s.url.clone(),
        })
        .collect();
    store.add_message(conversation, Role::Assistant, &response, sources);
    store.save(conversation).await?;

    Ok(())
}

/// The question comes from the prompt arguments, or from piped stdin when no
/// argument was given.
async fn resolve_question(prompt: Vec<String>) -> Result<String> {
    let joined = prompt.join(" ").trim().to_string();
    if !joined.is_empty() {
        return Ok(joined);
    }

    if std::io::stdin().is_terminal() {
        bail!("no question provided. Pass a prompt argument or pipe one on stdin.");
    }

    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .context("failed to read question from stdin")?;
    let question = buffer.trim().to_string();
    if question.is_empty() {
        bail!("no question provided on stdin.");
    }
    Ok(question)
}

/// The `/list` table on the command line.
pub async fn run_list(cfg: &RuntimeConfig, limit: usize) -> Result<()> {
    let store = ConversationStore::new(cfg.data_dir.clone());
    store.ensure_directory().await?;

    let summaries = store.list_summaries().await?;
    if summaries.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    println!("{}", format_summary_table(&summaries, limit));
    Ok(())
}
