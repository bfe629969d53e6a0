use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::api::{ChatTurn, SearchResult};

pub const ID_LENGTH: usize = 10;
const MAX_ID_LENGTH: usize = 32;
const TITLE_MAX_LENGTH: usize = 60;
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// JSON-file conversation store: one file per conversation plus a summary
/// index kept sorted by most recently updated.
#[derive(Debug)]
pub struct ConversationStore {
    base_dir: PathBuf,
    // Serializes the index read-modify-write cycle so overlapping save and
    // delete calls never race on index.json.
    index_lock: Mutex<()>,
}

impl ConversationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join(INDEX_FILE)
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    pub async fn ensure_directory(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create data directory '{}'",
                    self.base_dir.display()
                )
            })?;

        if tokio::fs::metadata(self.index_path()).await.is_err() {
            tokio::fs::write(self.index_path(), "[]")
                .await
                .with_context(|| {
                    format!("failed to initialize index at '{}'", self.index_path().display())
                })?;
        }

        Ok(())
    }

    pub async fn create(&self, title_seed: &str) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: generate_id(),
            title: truncate_title(title_seed),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };

        self.write_conversation(&conversation).await?;
        self.update_index(&conversation).await?;
        tracing::debug!(id = %conversation.id, "created conversation");
        Ok(conversation)
    }

    pub async fn load(&self, id: &str) -> Result<Conversation> {
        validate_id(id)?;
        let path = self.conversation_path(id);
        let data = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("conversation '{id}' not found"))?;
        serde_json::from_str(&data)
            .with_context(|| format!("conversation file '{}' is corrupted", path.display()))
    }

    /// Write-through save: bumps `updatedAt`, rewrites the conversation file,
    /// and refreshes its summary in the index.
    pub async fn save(&self, conversation: &mut Conversation) -> Result<()> {
        conversation.updated_at = Utc::now();
        self.write_conversation(conversation).await?;
        self.update_index(conversation).await
    }

    /// Append a message in memory only; callers persist with `save`.
    pub fn add_message<'c>(
        &self,
        conversation: &'c mut Conversation,
        role: Role,
        content: &str,
        sources: Vec<SearchResult>,
    ) -> &'c Message {
        conversation.messages.push(Message {
            id: generate_id(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            sources,
        });
        match conversation.messages.last() {
            Some(message) => message,
            None => unreachable!("message was just appended"),
        }
    }

    pub async fn list_summaries(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.read_index().await)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        tokio::fs::remove_file(self.conversation_path(id))
            .await
            .with_context(|| format!("conversation '{id}' not found"))?;

        let _guard = self.index_lock.lock().await;
        let mut summaries = self.read_index().await;
        summaries.retain(|s| s.id != id);
        self.write_index(summaries).await
    }

    pub async fn has_conversations(&self) -> bool {
        !self.read_index().await.is_empty()
    }

    pub async fn get_last_updated(&self) -> Option<ConversationSummary> {
        self.read_index().await.into_iter().next()
    }

    async fn write_conversation(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.id);
        let data =
            serde_json::to_string_pretty(conversation).context("failed to serialize conversation")?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write conversation file '{}'", path.display()))
    }

    async fn update_index(&self, conversation: &Conversation) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut summaries = self.read_index().await;
        let summary = ConversationSummary {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        };

        match summaries.iter_mut().find(|s| s.id == conversation.id) {
            Some(existing) => *existing = summary,
            None => summaries.push(summary),
        }

        self.write_index(summaries).await
    }

    // A missing or corrupted index reads as empty; it is rebuilt as
    // conversations are saved.
    async fn read_index(&self) -> Vec<ConversationSummary> {
        match tokio::fs::read_to_string(self.index_path()).await {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn write_index(&self, mut summaries: Vec<ConversationSummary>) -> Result<()> {
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let data = serde_json::to_string_pretty(&summaries).context("failed to serialize index")?;
        tokio::fs::write(self.index_path(), data)
            .await
            .with_context(|| {
                format!("failed to write index at '{}'", self.index_path().display())
            })
    }
}

pub fn generate_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), ID_LENGTH)
}

/// Ids become file names; reject anything that could escape the data
/// directory or collide with the index file.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id == "index"
        || id.len() > MAX_ID_LENGTH
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("conversation id '{id}' is invalid");
    }
    Ok(())
}

pub fn truncate_title(seed: &str) -> String {
    let normalized = seed.split_whitespace().collect::<Vec<&str>>().join(" ");
    if normalized.chars().count() <= TITLE_MAX_LENGTH {
        return normalized;
    }

    let mut truncated = normalized
        .chars()
        .take(TITLE_MAX_LENGTH - 1)
        .collect::<String>();
    truncated.push('…');
    truncated
}

pub fn history_turns(conversation: &Conversation) -> Vec<ChatTurn> {
    conversation
        .messages
        .iter()
        .map(|m| ChatTurn {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect()
}
