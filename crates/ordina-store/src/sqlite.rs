use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use ordina_types::api::NewMessage;
use ordina_types::events::FeedEvent;
use ordina_types::models::{MessageRecord, Reaction};

use crate::error::StoreError;
use crate::models::MessageJoinRow;
use crate::queries::{self, AuthorShape};
use crate::{MessageStore, migrations};

const FEED_CAPACITY: usize = 1024;

/// SQLite-backed [`MessageStore`]. One connection behind a mutex, WAL mode
/// for concurrent readers, and a broadcast feed that publishes every
/// successful mutation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    feed: broadcast::Sender<FeedEvent>,
    // Assigned timestamps must be strictly increasing in insertion order,
    // even when the clock ties within a microsecond.
    last_ts: Mutex<DateTime<Utc>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        info!("Store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            feed,
            last_ts: Mutex::new(DateTime::<Utc>::MIN_UTC),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_ts.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = Utc::now();
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }

    pub fn create_profile(&self, id: Uuid, full_name: Option<&str>) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        queries::create_profile(&conn, id, full_name)
    }

    pub fn create_channel(&self, id: Uuid, name: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        queries::create_channel(&conn, id, name)
    }

    fn assemble(
        &self,
        conn: &Connection,
        rows: Vec<MessageJoinRow>,
        shape: AuthorShape,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = queries::query_reactions_for(conn, &ids)?;

        let mut by_message: HashMap<String, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            let (message_id, reaction) = queries::parse_reaction(row)?;
            by_message.entry(message_id).or_default().push(reaction);
        }

        rows.into_iter()
            .map(|row| {
                let reactions = by_message.remove(&row.id).unwrap_or_default();
                queries::into_record(row, reactions, shape)
            })
            .collect()
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn fetch_recent(
        &self,
        channel_id: Uuid,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conn = self.lock_conn()?;
        let mut rows = queries::query_recent(&conn, channel_id, limit)?;
        rows.reverse();
        self.assemble(&conn, rows, AuthorShape::Joined)
    }

    async fn fetch_older(
        &self,
        channel_id: Uuid,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conn = self.lock_conn()?;
        let rows = queries::query_older(&conn, channel_id, before, limit)?;
        self.assemble(&conn, rows, AuthorShape::Joined)
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<MessageRecord>, StoreError> {
        let conn = self.lock_conn()?;
        match queries::query_by_id(&conn, id)? {
            Some(row) => Ok(self
                .assemble(&conn, vec![row], AuthorShape::Single)?
                .into_iter()
                .next()),
            None => Ok(None),
        }
    }

    async fn insert_message(&self, new: NewMessage) -> Result<(), StoreError> {
        let id = Uuid::new_v4();
        let created_at = self.next_timestamp();
        {
            let conn = self.lock_conn()?;
            queries::insert_message(&conn, id, &new, created_at)?;
        }
        let _ = self.feed.send(FeedEvent::MessageInserted {
            channel_id: new.channel_id,
            message_id: id,
        });
        Ok(())
    }

    async fn update_pinned(&self, id: Uuid, pinned: bool) -> Result<(), StoreError> {
        {
            let conn = self.lock_conn()?;
            queries::update_pinned(&conn, id, pinned)?;
        }
        let _ = self.feed.send(FeedEvent::PinUpdated {
            message_id: id,
            pinned,
        });
        Ok(())
    }

    async fn insert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), StoreError> {
        let added = {
            let conn = self.lock_conn()?;
            queries::insert_reaction(&conn, message_id, user_id, emoji)?
        };
        if added {
            let _ = self.feed.send(FeedEvent::ReactionAdded {
                message_id,
                user_id,
                emoji: emoji.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), StoreError> {
        let removed = {
            let conn = self.lock_conn()?;
            queries::delete_reaction(&conn, message_id, user_id, emoji)?
        };
        if removed {
            let _ = self.feed.send(FeedEvent::ReactionRemoved {
                message_id,
                user_id,
                emoji: emoji.to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}
