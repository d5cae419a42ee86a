//! Database row types — these map directly to SQLite rows.
//! Distinct from the ordina-types records to keep the DB layer independent.

pub struct MessageJoinRow {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
    pub reply_to_id: Option<String>,
    pub thread_root_id: Option<String>,
    pub is_pinned: bool,
    pub profile_id: Option<String>,
    pub profile_full_name: Option<String>,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}
