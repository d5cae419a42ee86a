use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events published on the store's change feed. The store emits one for
/// every successful mutation; consumers pick what they care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// A new message row was inserted
    MessageInserted { channel_id: Uuid, message_id: Uuid },

    /// A reaction was added to a message
    ReactionAdded {
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A reaction was removed from a message
    ReactionRemoved {
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A message's pinned flag changed
    PinUpdated { message_id: Uuid, pinned: bool },
}

impl FeedEvent {
    /// Returns the channel_id if this event is scoped to a specific channel.
    /// Events that return `None` carry only a message id; consumers that
    /// already hold the message resolve the channel themselves.
    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageInserted { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }
}
