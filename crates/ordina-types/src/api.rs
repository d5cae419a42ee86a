use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Insert request for a new message. The store assigns `id` and
/// `created_at`; the finished row comes back through the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub reply_to_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
}
