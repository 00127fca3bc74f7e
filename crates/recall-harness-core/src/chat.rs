//! Session-scoped chat transcripts.
//!
//! Each session is one list key, `key_prefix + session_id`, holding the
//! messages in append order. When a TTL is configured it is re-applied
//! after every append, so a session lives as long as it keeps receiving
//! messages within the window. Reads never touch the TTL.
//!
//! Per session: `absent → active` on the first append, `active → active`
//! on further appends, `active → absent` on [`ChatHistoryStore::clear`] or
//! when the TTL lapses.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::models::{Message, Role};
use crate::store::KeyValueStore;

pub const DEFAULT_SESSION_PREFIX: &str = "message_store:";

#[derive(Debug, Clone)]
pub struct ChatHistoryConfig {
    pub key_prefix: String,
    /// Session lifetime after its latest append; `None` keeps sessions
    /// until cleared.
    pub ttl: Option<Duration>,
}

impl Default for ChatHistoryConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_SESSION_PREFIX.to_string(),
            ttl: None,
        }
    }
}

/// List item layout: `{"type": "human", "data": {"content": "..."}}`.
#[derive(Serialize, Deserialize)]
struct StoredMessage {
    #[serde(rename = "type")]
    role: Role,
    data: StoredMessageData,
}

#[derive(Serialize, Deserialize)]
struct StoredMessageData {
    content: String,
}

impl From<&Message> for StoredMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            data: StoredMessageData {
                content: m.content.clone(),
            },
        }
    }
}

pub struct ChatHistoryStore {
    store: Arc<dyn KeyValueStore>,
    config: ChatHistoryConfig,
}

impl ChatHistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: ChatHistoryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ChatHistoryConfig {
        &self.config
    }

    pub fn session_key(&self, session_id: &str) -> Result<String> {
        if session_id.is_empty() {
            return Err(HarnessError::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }
        Ok(format!("{}{}", self.config.key_prefix, session_id))
    }

    /// Handle bound to one session.
    pub fn session(&self, session_id: impl Into<String>) -> SessionHistory<'_> {
        SessionHistory {
            history: self,
            session_id: session_id.into(),
        }
    }

    /// Messages in append order; empty for an absent or expired session.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let key = self.session_key(session_id)?;
        let items = self.store.get_list(&key).await?;
        items
            .iter()
            .map(|raw| {
                let stored: StoredMessage =
                    serde_json::from_slice(raw).map_err(|e| HarnessError::decode(&key, e))?;
                Ok(Message {
                    role: stored.role,
                    content: stored.data.content,
                })
            })
            .collect()
    }

    pub async fn add_user_message(&self, session_id: &str, text: &str) -> Result<()> {
        self.add_message(session_id, Message::human(text)).await
    }

    pub async fn add_ai_message(&self, session_id: &str, text: &str) -> Result<()> {
        self.add_message(session_id, Message::ai(text)).await
    }

    pub async fn add_system_message(&self, session_id: &str, text: &str) -> Result<()> {
        self.add_message(session_id, Message::system(text)).await
    }

    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        self.add_messages(session_id, std::slice::from_ref(&message))
            .await
    }

    /// Append several messages in one push, then refresh the TTL.
    pub async fn add_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let key = self.session_key(session_id)?;
        if messages.is_empty() {
            return Ok(());
        }

        let encoded = messages
            .iter()
            .map(|m| {
                serde_json::to_vec(&StoredMessage::from(m))
                    .map_err(|e| HarnessError::InvalidArgument(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let len = self.store.push_list(&key, &encoded).await?;
        if let Some(ttl) = self.config.ttl {
            self.store.expire(&key, ttl).await?;
        }
        debug!(session = %session_id, appended = messages.len(), len, "appended messages");
        Ok(())
    }

    /// Delete the session immediately, whatever its TTL.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        let key = self.session_key(session_id)?;
        self.store.delete(&[key]).await?;
        debug!(session = %session_id, "cleared session");
        Ok(())
    }
}

/// A [`ChatHistoryStore`] bound to one session id.
pub struct SessionHistory<'a> {
    history: &'a ChatHistoryStore,
    session_id: String,
}

impl SessionHistory<'_> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn get_messages(&self) -> Result<Vec<Message>> {
        self.history.get_messages(&self.session_id).await
    }

    pub async fn add_user_message(&self, text: &str) -> Result<()> {
        self.history.add_user_message(&self.session_id, text).await
    }

    pub async fn add_ai_message(&self, text: &str) -> Result<()> {
        self.history.add_ai_message(&self.session_id, text).await
    }

    pub async fn add_message(&self, message: Message) -> Result<()> {
        self.history.add_message(&self.session_id, message).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.history.clear(&self.session_id).await
    }
}
