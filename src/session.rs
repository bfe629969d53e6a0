use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;

use crate::api::{ChatClient, IndexedSource, SearchResult, StreamEvent, classify_api_error};
use crate::chat::{
    HELP_TEXT, LIST_MAX_ITEMS, ParsedCommand, SlashCommand, format_summary_table, parse_command,
};
use crate::clipboard::Clipboard;
use crate::config::PasteMode;
use crate::input::{InputEvent, InputReceiver, LineAssembler, PASTE_DEBOUNCE};
use crate::render::{DISABLE_BRACKETED_PASTE, ENABLE_BRACKETED_PASTE, Renderer};
use crate::store::{Conversation, ConversationStore, Role, history_turns};
use crate::theme;

/// Everything a session needs, injected so tests can drive it with fakes.
pub struct SessionDeps<W: Write> {
    pub client: Arc<dyn ChatClient>,
    pub store: ConversationStore,
    pub renderer: Renderer<W>,
    pub input: InputReceiver,
    pub clipboard: Arc<dyn Clipboard>,
    pub paste_mode: PasteMode,
    pub model: String,
    pub conversation: Option<Conversation>,
}

/// In-memory state scoped to one REPL run.
#[derive(Debug, Default)]
struct SessionState {
    conversation: Option<Conversation>,
    exit_requested: bool,
}

enum Dispatch {
    Continue,
    Exit,
}

/// The REPL session engine: multiplexes line input, dispatches slash
/// commands, and drives streamed chat turns while keeping the terminal
/// consistent across success, failure, and close.
pub struct Session<W: Write> {
    client: Arc<dyn ChatClient>,
    store: ConversationStore,
    renderer: Renderer<W>,
    input: InputReceiver,
    clipboard: Arc<dyn Clipboard>,
    paste_mode: PasteMode,
    model: String,
    assembler: LineAssembler,
    state: SessionState,
}

impl<W: Write> Session<W> {
    pub fn new(deps: SessionDeps<W>) -> Self {
        Self {
            client: deps.client,
            store: deps.store,
            renderer: deps.renderer,
            input: deps.input,
            clipboard: deps.clipboard,
            paste_mode: deps.paste_mode,
            model: deps.model,
            assembler: LineAssembler::default(),
            state: SessionState {
                conversation: deps.conversation,
                exit_requested: false,
            },
        }
    }

    /// Run the session to completion. Resolves when the user exits or input
    /// closes; never rejects on turn or command failures.
    pub async fn run(mut self) -> Result<()> {
        if self.paste_mode == PasteMode::Bracketed {
            self.renderer.write_raw(ENABLE_BRACKETED_PASTE)?;
        }

        self.renderer.info(&theme::intro_banner(&self.model))?;
        if self.state.conversation.is_none() && self.store.has_conversations().await {
            if let Some(last) = self.store.get_last_updated().await {
                self.renderer
                    .info(&format!("Tip: /resume {} picks up \"{}\".", last.id, last.title))?;
            }
        }

        if let Some(conversation) = self.state.conversation.take() {
            if !conversation.messages.is_empty() {
                self.replay(&conversation)?;
            }
            self.state.conversation = Some(conversation);
        }
        self.renderer.prompt_bare()?;

        loop {
            let Some(submission) = self.next_submission().await else {
                break;
            };
            if submission.is_empty() {
                self.renderer.prompt()?;
                continue;
            }

            self.renderer.newline()?;

            // Only a single-line submission can be a command; pasted text
            // that happens to start with `/` is an ordinary message.
            if submission.starts_with('/') && !submission.contains('\n') {
                match self.dispatch_command(&submission).await? {
                    Dispatch::Exit => {
                        self.state.exit_requested = true;
                        break;
                    }
                    Dispatch::Continue => {}
                }
            } else {
                self.send_message(&submission).await?;
            }
        }

        let goodbye = if self.state.exit_requested {
            "Goodbye!"
        } else {
            "\n\nGoodbye!"
        };
        self.renderer.info(goodbye)?;

        if self.paste_mode == PasteMode::Bracketed {
            self.renderer.write_raw(DISABLE_BRACKETED_PASTE)?;
        }

        Ok(())
    }

    /// Next logical submission, or `None` on end of input.
    async fn next_submission(&mut self) -> Option<String> {
        match self.paste_mode {
            PasteMode::Bracketed => loop {
                let event = self.input.next().await;
                if event == InputEvent::Closed {
                    return None;
                }
                if let Some(submission) = self.assembler.feed(&event) {
                    return Some(submission);
                }
            },
            PasteMode::Debounce => self.next_submission_debounced().await,
        }
    }

    /// Fallback for terminals without bracketed paste: lines arriving within
    /// the quiet window are joined into one submission. Racy against very
    /// slow paste delivery, which is why bracketed mode is the default.
    async fn next_submission_debounced(&mut self) -> Option<String> {
        let mut lines: Vec<String> = Vec::new();

        loop {
            match self.input.next().await {
                InputEvent::Line(line) => {
                    lines.push(line);
                    break;
                }
                InputEvent::Closed => return None,
                InputEvent::PasteStart | InputEvent::PasteEnd => {}
            }
        }

        loop {
            match tokio::time::timeout(PASTE_DEBOUNCE, self.input.next()).await {
                Ok(InputEvent::Line(line)) => lines.push(line),
                // Flush what is buffered; the close is observed on the next
                // read.
                Ok(InputEvent::Closed) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }

        Some(lines.join("\n").trim().to_string())
    }

    async fn dispatch_command(&mut self, submission: &str) -> Result<Dispatch> {
        match parse_command(submission) {
            ParsedCommand::Command(SlashCommand::Help) => {
                self.renderer.info(HELP_TEXT)?;
                self.renderer.prompt()?;
            }
            ParsedCommand::Command(SlashCommand::List) => self.handle_list().await?,
            ParsedCommand::Command(SlashCommand::Resume(id)) => self.handle_resume(&id).await?,
            ParsedCommand::Command(SlashCommand::Clear) => {
                self.state.conversation = None;
                self.renderer.info("Started new conversation.")?;
                self.renderer.prompt()?;
            }
            ParsedCommand::Command(SlashCommand::Delete(id)) => self.handle_delete(&id).await?,
            ParsedCommand::Command(SlashCommand::Copy) => self.handle_copy()?,
            ParsedCommand::Command(SlashCommand::Exit) => return Ok(Dispatch::Exit),
            ParsedCommand::MissingArgument { usage } => {
                self.renderer.error(usage)?;
                self.renderer.prompt()?;
            }
            ParsedCommand::Unknown(command) => {
                self.renderer.error(&format!("Unknown command: {command}"))?;
                if let Some(suggestion) = theme::suggest_command(command.trim_start_matches('/')) {
                    self.renderer.info(&suggestion)?;
                }
                self.renderer.prompt()?;
            }
            ParsedCommand::NotACommand => {
                self.send_message(submission).await?;
            }
        }

        Ok(Dispatch::Continue)
    }

    async fn handle_list(&mut self) -> Result<()> {
        match self.store.list_summaries().await {
            Ok(summaries) if summaries.is_empty() => {
                self.renderer.info("No conversations yet.")?;
            }
            Ok(summaries) => {
                self.renderer
                    .info(&format_summary_table(&summaries, LIST_MAX_ITEMS))?;
            }
            Err(err) => {
                self.renderer
                    .error(&format!("Failed to list conversations: {err}"))?;
            }
        }
        self.renderer.prompt()
    }

    async fn handle_resume(&mut self, id: &str) -> Result<()> {
        match self.store.load(id).await {
            Ok(conversation) => {
                self.replay(&conversation)?;
                self.state.conversation = Some(conversation);
            }
            Err(err) => {
                tracing::debug!(id, error = %err, "resume failed");
                self.renderer.error(&format!("Conversation not found: {id}"))?;
            }
        }
        self.renderer.prompt()
    }

    async fn handle_delete(&mut self, id: &str) -> Result<()> {
        match self.store.delete(id).await {
            Ok(()) => {
                if self.state.conversation.as_ref().is_some_and(|c| c.id == id) {
                    self.state.conversation = None;
                }
                self.renderer.info(&format!("Deleted conversation {id}."))?;
            }
            Err(err) => {
                self.renderer.error(&format!("Error: {err}"))?;
            }
        }
        self.renderer.prompt()
    }

    fn handle_copy(&mut self) -> Result<()> {
        let Some(conversation) = &self.state.conversation else {
            self.renderer.error("No conversation yet.")?;
            return self.renderer.prompt();
        };
        let Some(last) = conversation
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
        else {
            self.renderer.error("No assistant response to copy.")?;
            return self.renderer.prompt();
        };

        match self.clipboard.write_text(&last.content) {
            Ok(()) => self.renderer.info("Copied last response to clipboard.")?,
            Err(err) => self.renderer.error(&format!("Error: {err}"))?,
        }
        self.renderer.prompt()
    }

    fn replay(&mut self, conversation: &Conversation) -> Result<()> {
        for message in &conversation.messages {
            match message.role {
                Role::User => self.renderer.replay_user(&message.content)?,
                Role::Assistant => {
                    self.renderer.assistant_complete(&message.content)?;
                    if !message.sources.is_empty() {
                        self.renderer.sources(&index_sources(&message.sources))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// One full chat turn. Failures are classified and shown; input is
    /// resumed and the prompt redisplayed no matter what happened.
    async fn send_message(&mut self, content: &str) -> Result<()> {
        if let Err(err) = self.run_turn(content).await {
            tracing::warn!(error = %err, "turn failed");
            self.renderer.assistant_end("")?;
            self.renderer.error(&classify_api_error(&err))?;
        }

        self.input.resume();
        self.renderer.prompt()
    }

    async fn run_turn(&mut self, content: &str) -> Result<()> {
        // Conversations are created on first message, not at session start,
        // so an exited-without-sending session leaves no record behind.
        if self.state.conversation.is_none() {
            self.state.conversation = Some(self.store.create(content).await?);
        }
        let conversation = self
            .state
            .conversation
            .as_mut()
            .context("no active conversation")?;

        self.store
            .add_message(conversation, Role::User, content, Vec::new());
        self.store.save(conversation).await?;

        self.input.pause();

        let mut stream = self.client.stream_chat(history_turns(conversation)).await?;
        let mut response = String::new();
        let mut results: Vec<SearchResult> = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token(token) => {
                    self.renderer.assistant_token(&token)?;
                    response.push_str(&token);
                }
                StreamEvent::Sources(found) => results = found,
            }
        }

        self.renderer.assistant_end(&response)?;

        let cited = cited_sources(&response, &results);
        if !cited.is_empty() {
            self.renderer.sources(&cited)?;
        }

        let sources = cited
            .iter()
            .map(|s| SearchResult {
                title: s.title.clone(),
                url: s.url.clone(),
            })
            .collect();
        self.store
            .add_message(conversation, Role::Assistant, &response, sources);
        self.store.save(conversation).await?;

        Ok(())
    }
}

/// Pair each result with its 1-based citation index.
pub fn index_sources(results: &[SearchResult]) -> Vec<IndexedSource> {
    results
        .iter()
        .enumerate()
        .map(|(position, result)| IndexedSource {
            index: position + 1,
            title: result.title.clone(),
            url: result.url.clone(),
        })
        .collect()
}

/// Keep only the sources whose `[N]` marker literally appears in the
/// response text.
pub fn cited_sources(response: &str, results: &[SearchResult]) -> Vec<IndexedSource> {
    index_sources(results)
        .into_iter()
        .filter(|source| response.contains(&format!("[{}]", source.index)))
        .collect()
}
