//! Session CRUD. All functions take an already-checked-out
//! connection so callers can compose them inside a single transaction.

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::schema::sessions;

use super::json_merge::{deep_merge, strip_system_key};
use super::locks::{acquire_xact_lock, session_lock_key};
use super::models::{NewSession, Session};
use super::users;

pub fn create(
    conn: &mut PgConnection,
    project_id: Uuid,
    session_id: &str,
    user_id: Option<&str>,
    metadata: serde_json::Value,
) -> Result<Session> {
    if session_id.is_empty() {
        return Err(MemoryError::bad_request("session_id must not be empty"));
    }

    conn.transaction(|conn| {
        if let Some(existing) = find_any(conn, project_id, session_id)? {
            if !existing.is_deleted() {
                return Err(MemoryError::AlreadyExists);
            }
            return undelete_with_new_owner(conn, existing.id, user_id, metadata);
        }

        if let Some(uid) = user_id {
            users::ensure_exists(conn, uid)?;
        }

        let new_session = NewSession {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            project_id,
            user_id: user_id.map(|s| s.to_string()),
            metadata,
        };

        diesel::insert_into(sessions::table)
            .values(&new_session)
            .get_result(conn)
            .map_err(MemoryError::from)
    })
}

/// Revives a soft-deleted session under the same business key, replacing
/// its metadata and owner rather than merging — this is a fresh `create`,
/// not an `update`.
fn undelete_with_new_owner(
    conn: &mut PgConnection,
    id: Uuid,
    user_id: Option<&str>,
    metadata: serde_json::Value,
) -> Result<Session> {
    if let Some(uid) = user_id {
        users::ensure_exists(conn, uid)?;
    }

    diesel::update(sessions::table.find(id))
        .set((
            sessions::user_id.eq(user_id),
            sessions::metadata.eq(metadata),
            sessions::updated_at.eq(Utc::now()),
            sessions::deleted_at.eq::<Option<chrono::DateTime<Utc>>>(None),
            sessions::ended_at.eq::<Option<chrono::DateTime<Utc>>>(None),
        ))
        .get_result(conn)
        .map_err(MemoryError::from)
}

/// Session lookup ignoring soft-deletion, used internally to decide between
/// insert/update/undelete.
pub fn find_any(
    conn: &mut PgConnection,
    project_id: Uuid,
    session_id: &str,
) -> Result<Option<Session>> {
    sessions::table
        .filter(sessions::project_id.eq(project_id))
        .filter(sessions::session_id.eq(session_id))
        .select(Session::as_select())
        .first(conn)
        .optional()
        .map_err(MemoryError::from)
}

fn find_live(
    conn: &mut PgConnection,
    project_id: Uuid,
    session_id: &str,
) -> Result<Option<Session>> {
    Ok(find_any(conn, project_id, session_id)?.filter(|s| !s.is_deleted()))
}

/// Get a session by its internal id, visible only when not soft-deleted.
pub fn get(conn: &mut PgConnection, id: Uuid) -> Result<Option<Session>> {
    let session: Option<Session> = sessions::table
        .find(id)
        .select(Session::as_select())
        .first(conn)
        .optional()
        .map_err(MemoryError::from)?;
    Ok(session.filter(|s| !s.is_deleted()))
}

pub fn get_by_external_id(
    conn: &mut PgConnection,
    project_id: Uuid,
    session_id: &str,
) -> Result<Option<Session>> {
    find_live(conn, project_id, session_id)
}

/// Ensures a session exists for `session_id`, lazily creating it if absent.
/// Never undeletes implicitly — only explicit `update` with empty metadata
/// may do that.
pub fn ensure_exists(
    conn: &mut PgConnection,
    project_id: Uuid,
    session_id: &str,
) -> Result<Session> {
    if let Some(existing) = find_any(conn, project_id, session_id)? {
        return Ok(existing);
    }

    create(
        conn,
        project_id,
        session_id,
        None,
        serde_json::Value::Object(Default::default()),
    )
}

/// Deep-merges `metadata` over the session's stored metadata under a
/// transaction-scoped advisory lock, optionally stripping the reserved
/// `system` key from the incoming write, and may undelete a soft-deleted
/// session.
pub fn update(
    conn: &mut PgConnection,
    project_id: Uuid,
    session_id: &str,
    mut metadata: serde_json::Value,
    undelete: bool,
    privileged: bool,
) -> Result<Session> {
    let Some(current) = find_any(conn, project_id, session_id)? else {
        return Err(MemoryError::NotFound);
    };

    if !current.is_deleted() && current.is_ended() {
        return Err(MemoryError::SessionEnded);
    }

    if !metadata.is_null() && !(metadata.is_object() && metadata.as_object().unwrap().is_empty())
    {
        acquire_xact_lock(conn, session_lock_key(session_id))?;

        if !privileged {
            strip_system_key(&mut metadata);
        }

        let mut merged = current.metadata.clone();
        deep_merge(&mut merged, metadata);

        let deleted_at: Option<chrono::DateTime<Utc>> = if undelete { None } else { current.deleted_at };

        return diesel::update(sessions::table.find(current.id))
            .set((
                sessions::metadata.eq(merged),
                sessions::updated_at.eq(Utc::now()),
                sessions::deleted_at.eq(deleted_at),
            ))
            .get_result(conn)
            .map_err(MemoryError::from);
    }

    if undelete && current.is_deleted() {
        return diesel::update(sessions::table.find(current.id))
            .set((
                sessions::deleted_at.eq::<Option<chrono::DateTime<Utc>>>(None),
                sessions::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)
            .map_err(MemoryError::from);
    }

    Ok(current)
}

pub fn list(
    conn: &mut PgConnection,
    project_id: Uuid,
    cursor: i64,
    limit: i64,
) -> Result<Vec<Session>> {
    // `cursor` is an opaque position, implemented as a row-number offset
    // over sessions ordered by internal creation order. We key off `id`
    // ordering for stability since `sessions` has no surrogate integer key.
    sessions::table
        .filter(sessions::project_id.eq(project_id))
        .filter(sessions::deleted_at.is_null())
        .order(sessions::created_at.asc())
        .offset(cursor)
        .limit(limit)
        .select(Session::as_select())
        .load(conn)
        .map_err(MemoryError::from)
}

pub enum OrderBy {
    CreatedAt,
    UpdatedAt,
    SessionId,
}

pub fn list_ordered(
    conn: &mut PgConnection,
    project_id: Uuid,
    page: i64,
    size: i64,
    order_by: OrderBy,
    asc: bool,
) -> Result<(Vec<Session>, i64)> {
    let total: i64 = sessions::table
        .filter(sessions::project_id.eq(project_id))
        .filter(sessions::deleted_at.is_null())
        .count()
        .get_result(conn)
        .map_err(MemoryError::from)?;

    let offset = page.max(0) * size;

    macro_rules! ordered_query {
        ($col:expr) => {{
            let base = sessions::table
                .filter(sessions::project_id.eq(project_id))
                .filter(sessions::deleted_at.is_null())
                .offset(offset)
                .limit(size)
                .select(Session::as_select());
            if asc {
                base.order($col.asc()).load(conn)
            } else {
                base.order($col.desc()).load(conn)
            }
        }};
    }

    let rows: Vec<Session> = match order_by {
        OrderBy::CreatedAt => ordered_query!(sessions::created_at),
        OrderBy::UpdatedAt => ordered_query!(sessions::updated_at),
        OrderBy::SessionId => ordered_query!(sessions::session_id),
    }
    .map_err(MemoryError::from)?;

    Ok((rows, total))
}

/// Soft-deletes the session row itself. Cascading soft-delete of messages,
/// summaries, and embeddings is the caller's (`Store::delete_session`)
/// responsibility, run in the same transaction.
pub fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    diesel::update(sessions::table.find(id))
        .set((
            sessions::deleted_at.eq(Some(Utc::now())),
            sessions::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .map_err(MemoryError::from)?;
    Ok(())
}

/// Hard-delete sessions soft-deleted before `cutoff`. Used by the purge
/// sweep; cascading hard-delete order is explicit here, not FK cascade.
pub fn purge_older_than(conn: &mut PgConnection, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
    diesel::delete(sessions::table.filter(sessions::deleted_at.lt(cutoff)))
        .execute(conn)
        .map_err(MemoryError::from)
}
