use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use ordina_types::api::NewMessage;
use ordina_types::models::{MessageRecord, OneOrMany, Profile, Reaction};

use crate::error::StoreError;
use crate::models::{MessageJoinRow, ReactionRow};

/// Timestamps are stored as fixed-width UTC text so that lexicographic
/// comparison inside SQLite matches chronological order.
const TS_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TS_READ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_WRITE_FORMAT).to_string()
}

pub fn parse_ts(text: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(text, TS_READ_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{text}': {e}")))
}

fn parse_uuid(text: &str, column: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(text).map_err(|e| StoreError::Corrupt(format!("bad {column} '{text}': {e}")))
}

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.channel_id, m.author_id, m.body, m.created_at,
           m.reply_to_id, m.thread_root_id, m.is_pinned,
           p.id, p.full_name
    FROM messages m
    LEFT JOIN profiles p ON p.id = m.author_id
";

fn read_join_row(row: &Row<'_>) -> rusqlite::Result<MessageJoinRow> {
    Ok(MessageJoinRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        author_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        reply_to_id: row.get(5)?,
        thread_root_id: row.get(6)?,
        is_pinned: row.get(7)?,
        profile_id: row.get(8)?,
        profile_full_name: row.get(9)?,
    })
}

/// Most recent `limit` messages of a channel, newest first. The caller
/// reverses to get ascending order.
pub fn query_recent(
    conn: &Connection,
    channel_id: Uuid,
    limit: u32,
) -> Result<Vec<MessageJoinRow>, StoreError> {
    let sql = format!(
        "{MESSAGE_SELECT} WHERE m.channel_id = ?1 ORDER BY m.created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![channel_id.to_string(), limit], read_join_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Messages strictly older than `before`, ascending, up to `limit`.
pub fn query_older(
    conn: &Connection,
    channel_id: Uuid,
    before: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<MessageJoinRow>, StoreError> {
    let sql = format!(
        "{MESSAGE_SELECT} WHERE m.channel_id = ?1 AND m.created_at < ?2
         ORDER BY m.created_at ASC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![channel_id.to_string(), format_ts(before), limit],
            read_join_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn query_by_id(conn: &Connection, id: Uuid) -> Result<Option<MessageJoinRow>, StoreError> {
    use rusqlite::OptionalExtension;

    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row([id.to_string()], read_join_row)
        .optional()?;
    Ok(row)
}

/// Batch-fetch reactions for a set of message IDs.
pub fn query_reactions_for(
    conn: &Connection,
    message_ids: &[String],
) -> Result<Vec<ReactionRow>, StoreError> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn insert_message(
    conn: &Connection,
    id: Uuid,
    new: &NewMessage,
    created_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO messages (id, channel_id, author_id, body, created_at, reply_to_id, thread_root_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id.to_string(),
            new.channel_id.to_string(),
            new.author_id.to_string(),
            new.body,
            format_ts(created_at),
            new.reply_to_id.map(|u| u.to_string()),
            new.thread_root_id.map(|u| u.to_string()),
        ],
    )?;
    Ok(())
}

pub fn update_pinned(conn: &Connection, id: Uuid, pinned: bool) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
        rusqlite::params![id.to_string(), pinned],
    )?;
    Ok(())
}

/// Returns true if a new reaction row was created. Re-inserting an existing
/// (message, user, emoji) triple is a no-op thanks to the UNIQUE constraint.
pub fn insert_reaction(
    conn: &Connection,
    message_id: Uuid,
    user_id: Uuid,
    emoji: &str,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO reactions (id, message_id, user_id, emoji) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            message_id.to_string(),
            user_id.to_string(),
            emoji,
        ],
    )?;
    Ok(changed > 0)
}

/// Returns true if a reaction row was deleted.
pub fn delete_reaction(
    conn: &Connection,
    message_id: Uuid,
    user_id: Uuid,
    emoji: &str,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
        rusqlite::params![message_id.to_string(), user_id.to_string(), emoji],
    )?;
    Ok(changed > 0)
}

pub fn create_profile(
    conn: &Connection,
    id: Uuid,
    full_name: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO profiles (id, full_name) VALUES (?1, ?2)",
        rusqlite::params![id.to_string(), full_name],
    )?;
    Ok(())
}

pub fn create_channel(conn: &Connection, id: Uuid, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO channels (id, name) VALUES (?1, ?2)",
        rusqlite::params![id.to_string(), name],
    )?;
    Ok(())
}

/// How the joined author is shaped in the returned record: point reads
/// produce a single object, list queries a one-element sequence.
#[derive(Clone, Copy)]
pub enum AuthorShape {
    Single,
    Joined,
}

pub fn into_record(
    row: MessageJoinRow,
    reactions: Vec<Reaction>,
    shape: AuthorShape,
) -> Result<MessageRecord, StoreError> {
    let author = match row.profile_id {
        Some(profile_id) => {
            let profile = Profile {
                id: parse_uuid(&profile_id, "profile id")?,
                full_name: row.profile_full_name,
            };
            Some(match shape {
                AuthorShape::Single => OneOrMany::One(profile),
                AuthorShape::Joined => OneOrMany::Many(vec![profile]),
            })
        }
        None => None,
    };

    Ok(MessageRecord {
        id: parse_uuid(&row.id, "message id")?,
        channel_id: parse_uuid(&row.channel_id, "channel id")?,
        author_id: parse_uuid(&row.author_id, "author id")?,
        body: row.body,
        created_at: parse_ts(&row.created_at)?,
        reply_to_id: row.reply_to_id.as_deref().map(|s| parse_uuid(s, "reply_to_id")).transpose()?,
        thread_root_id: row
            .thread_root_id
            .as_deref()
            .map(|s| parse_uuid(s, "thread_root_id"))
            .transpose()?,
        is_pinned: row.is_pinned,
        author,
        reactions: Some(reactions),
    })
}

pub fn parse_reaction(row: ReactionRow) -> Result<(String, Reaction), StoreError> {
    let user_id = parse_uuid(&row.user_id, "reaction user id")?;
    Ok((
        row.message_id,
        Reaction {
            emoji: row.emoji,
            user_id,
        },
    ))
}
