//! Rolling summary persistence. Summaries are insert-only;
//! "the current summary" is whichever row has the greatest `created_at`.

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::schema::summary;

use super::models::{NewSummary, Summary};

pub fn put(
    conn: &mut PgConnection,
    session_id: Uuid,
    content: &str,
    token_count: i32,
    summary_point_uuid: Uuid,
    metadata: serde_json::Value,
) -> Result<Summary> {
    let row = NewSummary {
        id: Uuid::new_v4(),
        session_id,
        content: content.to_string(),
        token_count,
        summary_point_uuid,
        metadata,
    };

    diesel::insert_into(summary::table)
        .values(&row)
        .get_result(conn)
        .map_err(MemoryError::from)
}

pub fn get_latest(conn: &mut PgConnection, session_id: Uuid) -> Result<Option<Summary>> {
    summary::table
        .filter(summary::session_id.eq(session_id))
        .filter(summary::deleted_at.is_null())
        .order(summary::created_at.desc())
        .select(Summary::as_select())
        .first(conn)
        .optional()
        .map_err(MemoryError::from)
}

pub fn soft_delete_for_session(conn: &mut PgConnection, session_id: Uuid) -> Result<()> {
    diesel::update(
        summary::table
            .filter(summary::session_id.eq(session_id))
            .filter(summary::deleted_at.is_null()),
    )
    .set((
        summary::deleted_at.eq(Some(Utc::now())),
        summary::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .map_err(MemoryError::from)?;
    Ok(())
}

pub fn purge_older_than(conn: &mut PgConnection, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
    diesel::delete(summary::table.filter(summary::deleted_at.lt(cutoff)))
        .execute(conn)
        .map_err(MemoryError::from)
}
