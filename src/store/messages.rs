//! Message persistence and the message selection policy.

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::schema::messages;

use super::json_merge::{deep_merge, set_at_path, strip_system_key};
use super::locks::{acquire_xact_lock, message_lock_key};
use super::models::{Message, MessageInput, NewMessage};

/// Upsert a batch of messages for `session_id` in a single multi-row INSERT
/// so that sequence numbers are assigned in input order — within one call,
/// messages land in the store in the order they were given. `id`s absent
/// from the input are generated here.
pub fn put_messages(
    conn: &mut PgConnection,
    session_id: Uuid,
    inputs: &[MessageInput],
) -> Result<Vec<Message>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<NewMessage> = inputs
        .iter()
        .map(|m| NewMessage {
            id: m.id.unwrap_or_else(Uuid::new_v4),
            session_id,
            role: m.role.clone(),
            role_type: m.role_type.as_str().to_string(),
            content: m.content.clone(),
            token_count: m.token_count,
            metadata: m.metadata.clone(),
        })
        .collect();

    diesel::insert_into(messages::table)
        .values(&rows)
        .on_conflict(messages::id)
        .do_update()
        .set((
            messages::role.eq(excluded(messages::role)),
            messages::role_type.eq(excluded(messages::role_type)),
            messages::content.eq(excluded(messages::content)),
            messages::token_count.eq(excluded(messages::token_count)),
            messages::metadata.eq(excluded(messages::metadata)),
            messages::updated_at.eq(Utc::now()),
        ))
        .get_results(conn)
        .map_err(MemoryError::from)
}

/// Resolve a summary point UUID to a live (non-deleted) message's sequence
/// number, within `session_id`. Returns `None` if the pivot message is
/// soft-deleted or doesn't exist — callers degrade to the window policy
///.
pub fn pivot_sequence(
    conn: &mut PgConnection,
    session_id: Uuid,
    summary_point_uuid: Uuid,
) -> Result<Option<i64>> {
    messages::table
        .filter(messages::session_id.eq(session_id))
        .filter(messages::id.eq(summary_point_uuid))
        .filter(messages::deleted_at.is_null())
        .select(messages::sequence_id)
        .first(conn)
        .optional()
        .map_err(MemoryError::from)
}

/// The three-case message selection policy:
/// 1. `last_n > 0` — last N messages, ascending.
/// 2. else a resolvable summary pivot — messages after the pivot, ascending.
/// 3. else up to `window_size` most recent, ascending.
pub fn get_messages(
    conn: &mut PgConnection,
    session_id: Uuid,
    window_size: i64,
    pivot_sequence_id: Option<i64>,
    last_n: i64,
) -> Result<Vec<Message>> {
    if last_n > 0 {
        let mut rows: Vec<Message> = messages::table
            .filter(messages::session_id.eq(session_id))
            .filter(messages::deleted_at.is_null())
            .order(messages::sequence_id.desc())
            .limit(last_n)
            .select(Message::as_select())
            .load(conn)
            .map_err(MemoryError::from)?;
        rows.reverse();
        return Ok(rows);
    }

    if let Some(pivot) = pivot_sequence_id {
        return messages::table
            .filter(messages::session_id.eq(session_id))
            .filter(messages::deleted_at.is_null())
            .filter(messages::sequence_id.gt(pivot))
            .order(messages::sequence_id.asc())
            .select(Message::as_select())
            .load(conn)
            .map_err(MemoryError::from);
    }

    let mut rows: Vec<Message> = messages::table
        .filter(messages::session_id.eq(session_id))
        .filter(messages::deleted_at.is_null())
        .order(messages::sequence_id.desc())
        .limit(window_size)
        .select(Message::as_select())
        .load(conn)
        .map_err(MemoryError::from)?;
    rows.reverse();
    Ok(rows)
}

pub fn count_live(conn: &mut PgConnection, session_id: Uuid) -> Result<i64> {
    messages::table
        .filter(messages::session_id.eq(session_id))
        .filter(messages::deleted_at.is_null())
        .count()
        .get_result(conn)
        .map_err(MemoryError::from)
}

/// One metadata write entry for `putMessageMetadata`.
pub struct MetadataEntry {
    pub message_id: Uuid,
    pub path: String,
    pub value: serde_json::Value,
}

/// Apply a batch of metadata patches, one transaction-scoped advisory lock
/// per entry, keyed by `session_id + message_uuid`. Unprivileged writers have
/// the `system` top-level key stripped from root merges and are rejected
/// outright if the dot-path itself starts with `system`.
pub fn put_message_metadata(
    conn: &mut PgConnection,
    session_id_str: &str,
    entries: &[MetadataEntry],
    privileged: bool,
) -> Result<()> {
    for entry in entries {
        if !privileged {
            if let Some(first_segment) = entry.path.split('.').next() {
                if !entry.path.is_empty() && first_segment == "system" {
                    return Err(MemoryError::bad_request(format!(
                        "cannot write to reserved path {}",
                        entry.path
                    )));
                }
            }
        }

        acquire_xact_lock(conn, message_lock_key(session_id_str, &entry.message_id))?;

        let current: serde_json::Value = messages::table
            .filter(messages::id.eq(entry.message_id))
            .select(messages::metadata)
            .first(conn)
            .map_err(MemoryError::from)?;

        let mut value = entry.value.clone();
        if !privileged {
            strip_system_key(&mut value);
        }

        let mut merged = current;
        if entry.path.is_empty() {
            deep_merge(&mut merged, value);
        } else {
            set_at_path(&mut merged, &entry.path, value);
        }

        diesel::update(messages::table.filter(messages::id.eq(entry.message_id)))
            .set((
                messages::metadata.eq(merged),
                messages::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .map_err(MemoryError::from)?;
    }

    Ok(())
}

pub fn soft_delete_for_session(conn: &mut PgConnection, session_id: Uuid) -> Result<()> {
    diesel::update(
        messages::table
            .filter(messages::session_id.eq(session_id))
            .filter(messages::deleted_at.is_null()),
    )
    .set((
        messages::deleted_at.eq(Some(Utc::now())),
        messages::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .map_err(MemoryError::from)?;
    Ok(())
}

pub fn purge_older_than(conn: &mut PgConnection, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
    diesel::delete(messages::table.filter(messages::deleted_at.lt(cutoff)))
        .execute(conn)
        .map_err(MemoryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_entry_rejects_system_path_prefix_when_unprivileged() {
        // Pure-logic slice of the rejection rule, independent of a DB.
        let path = "system.flag";
        let first = path.split('.').next().unwrap();
        assert_eq!(first, "system");
    }
}
