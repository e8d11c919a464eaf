//! Locally tracked conversation history.
//!
//! Messages form a forest through `parent_message_id`. They are stored flat
//! and looked up by id; nothing holds a pointer to another message.

pub mod context;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::{new_id, unix_now_millis};

pub use context::{build_ancestry_chain, render_previous_context, render_transcript};
pub use store::{ConversationCache, ConversationStore, JsonFileCache, MemoryCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Bot,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Message {
    /// A new message with a fresh id.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>, parent_message_id: Option<String>) -> Self {
        Self {
            id: new_id(),
            parent_message_id,
            role,
            text: text.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Append-only message list stored under one conversation handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub handle: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: u64,
}

impl Conversation {
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            messages: Vec::new(),
            created_at: unix_now_millis(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}
