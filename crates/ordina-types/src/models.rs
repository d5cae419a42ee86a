use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed reaction palette rendered under every message.
pub const EMOJI_PALETTE: [&str; 5] = ["👍", "✅", "🧪", "📌", "👀"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
}

/// An (emoji, reactor) pair attached to a message. At most one exists per
/// (message, reactor, emoji) triple — the store enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
}

/// Canonical message shape used by the view. Only `is_pinned` and
/// `reactions` mutate after creation; everything else is store-assigned and
/// immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub is_pinned: bool,
    pub author: Option<Profile>,
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Replies are rendered indented under their parent.
    pub fn is_reply(&self) -> bool {
        self.reply_to_id.is_some()
    }

    pub fn author_name(&self) -> &str {
        self.author
            .as_ref()
            .and_then(|p| p.full_name.as_deref())
            .unwrap_or("Member")
    }

    pub fn has_reaction(&self, user_id: Uuid, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji)
    }
}

/// A related record as the store's join layer returns it: a single object or
/// a one-element sequence depending on join cardinality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::One(value) => Some(value),
            OneOrMany::Many(values) => values.into_iter().next(),
        }
    }
}

/// Raw fetch shape, before the join ambiguity is collapsed. Every ingestion
/// point (initial batch, live fetch-by-id, backfill) goes through
/// [`MessageRecord::normalize`]; rendering logic never sees this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub is_pinned: bool,
    #[serde(default)]
    pub author: Option<OneOrMany<Profile>>,
    #[serde(default)]
    pub reactions: Option<Vec<Reaction>>,
}

impl MessageRecord {
    /// Collapse the union-shaped author field to a single optional profile
    /// and default a missing reaction list to empty.
    pub fn normalize(self) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            body: self.body,
            created_at: self.created_at,
            reply_to_id: self.reply_to_id,
            thread_root_id: self.thread_root_id,
            is_pinned: self.is_pinned,
            author: self.author.and_then(OneOrMany::into_first),
            reactions: self.reactions.unwrap_or_default(),
        }
    }
}
