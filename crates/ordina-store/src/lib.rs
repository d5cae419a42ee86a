pub mod error;
mod migrations;
mod models;
mod queries;
mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use ordina_types::api::NewMessage;
use ordina_types::events::FeedEvent;
use ordina_types::models::MessageRecord;

/// The narrow interface the message view consumes. Everything behind it
/// (relational schema, access policy, hosting) is someone else's problem.
///
/// All list results are ascending by `created_at`. The store assigns message
/// ids and timestamps; timestamps are strictly increasing in insertion
/// order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` most recent messages of a channel, ascending.
    async fn fetch_recent(
        &self,
        channel_id: Uuid,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// Up to `limit` messages strictly older than `before`, ascending.
    async fn fetch_older(
        &self,
        channel_id: Uuid,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<MessageRecord>, StoreError>;

    async fn insert_message(&self, new: NewMessage) -> Result<(), StoreError>;

    async fn update_pinned(&self, id: Uuid, pinned: bool) -> Result<(), StoreError>;

    async fn insert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), StoreError>;

    async fn delete_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), StoreError>;

    /// Subscribe to the change feed. The feed is global; consumers filter by
    /// [`FeedEvent::channel_id`]. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<FeedEvent>;
}
