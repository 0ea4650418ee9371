//! User upsert keyed by the externally-supplied `user_id`.

use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::schema::users;

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: Uuid,
    user_id: &'a str,
}

/// Upserts a `users` row for `user_id` so a session can satisfy the foreign
/// key on `sessions.user_id` regardless of whether this is the caller's
/// first session under that user id.
pub fn ensure_exists(conn: &mut PgConnection, user_id: &str) -> Result<()> {
    diesel::insert_into(users::table)
        .values(&NewUser {
            id: Uuid::new_v4(),
            user_id,
        })
        .on_conflict(users::user_id)
        .do_nothing()
        .execute(conn)
        .map_err(MemoryError::from)?;
    Ok(())
}
