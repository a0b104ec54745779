//! Typed chat records parsed from JSONL lines.

use serde::{Deserialize, Serialize};

use crate::error::MalformedRecord;

/// Speaker of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Which side of a training pair a message feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Input,
    Target,
}

impl Role {
    /// System prompts are folded into the input side together with user turns.
    pub fn bucket(self) -> Bucket {
        match self {
            Role::System | Role::User => Bucket::Input,
            Role::Assistant => Bucket::Target,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn bucket(&self) -> Bucket {
        self.role.bucket()
    }
}

/// An ordered chat transcript. Message order is dialogue order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_reply(&self) -> bool {
        self.messages.iter().any(|m| m.bucket() == Bucket::Target)
    }

    /// Number of places where consecutive messages switch bucket.
    pub fn bucket_transitions(&self) -> usize {
        self.messages
            .windows(2)
            .filter(|w| w[0].bucket() != w[1].bucket())
            .count()
    }

    /// Serialize back into the one-object-per-line record format.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse one conversation record such as
/// `{"messages":[{"role":"user","content":"Hi"}]}`.
///
/// Keys other than `messages`, `role` and `content` are ignored.
pub fn parse_conversation(line: &str) -> Result<Conversation, MalformedRecord> {
    serde_json::from_str::<Conversation>(line).map_err(|e| MalformedRecord {
        reason: e.to_string(),
    })
}

/// Like [`parse_conversation`], for a raw line that may not be valid UTF-8.
pub fn parse_conversation_bytes(line: &[u8]) -> Result<Conversation, MalformedRecord> {
    serde_json::from_slice::<Conversation>(line).map_err(|e| MalformedRecord {
        reason: e.to_string(),
    })
}
