//! Embedding placeholder rows and vector updates.

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::schema::message_embedding;

use super::models::{MessageEmbeddingRow, NewMessageEmbedding};

/// Insert zero-vector placeholder rows for a batch of newly-written
/// messages, one per message, `ON CONFLICT DO NOTHING` so a retried
/// `putMessages` upsert never clobbers an embedding an extractor has since
/// computed.
pub fn insert_placeholders(
    conn: &mut PgConnection,
    session_id: Uuid,
    message_uuids: &[Uuid],
    dimensions: usize,
) -> Result<()> {
    if message_uuids.is_empty() {
        return Ok(());
    }

    let zero = pgvector::Vector::from(vec![0.0f32; dimensions]);
    let rows: Vec<NewMessageEmbedding> = message_uuids
        .iter()
        .map(|message_uuid| NewMessageEmbedding {
            id: Uuid::new_v4(),
            session_id,
            message_uuid: *message_uuid,
            embedding: zero.clone(),
            is_embedded: false,
        })
        .collect();

    diesel::insert_into(message_embedding::table)
        .values(&rows)
        .on_conflict(message_embedding::message_uuid)
        .do_nothing()
        .execute(conn)
        .map_err(MemoryError::from)?;

    Ok(())
}

/// Update the placeholder rows for a batch of `(message_uuid, vector)` pairs,
/// matched on `(session_id, message_uuid)`.
pub fn put_vectors(
    conn: &mut PgConnection,
    session_id: Uuid,
    vectors: &[(Uuid, Vec<f32>)],
) -> Result<()> {
    for (message_uuid, vector) in vectors {
        diesel::update(
            message_embedding::table
                .filter(message_embedding::session_id.eq(session_id))
                .filter(message_embedding::message_uuid.eq(message_uuid)),
        )
        .set((
            message_embedding::embedding.eq(pgvector::Vector::from(vector.clone())),
            message_embedding::is_embedded.eq(true),
            message_embedding::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .map_err(MemoryError::from)?;
    }
    Ok(())
}

pub fn get_vectors(
    conn: &mut PgConnection,
    session_id: Uuid,
    message_uuids: &[Uuid],
) -> Result<Vec<MessageEmbeddingRow>> {
    message_embedding::table
        .filter(message_embedding::session_id.eq(session_id))
        .filter(message_embedding::message_uuid.eq_any(message_uuids))
        .filter(message_embedding::deleted_at.is_null())
        .select(MessageEmbeddingRow::as_select())
        .load(conn)
        .map_err(MemoryError::from)
}

#[derive(QueryableByName)]
struct DimensionRow {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    dims: i32,
}

/// Reads the `vector(N)` dimension the `embedding` column is currently
/// declared with, straight from the catalog.
pub fn current_dimension(conn: &mut PgConnection) -> Result<i32> {
    let row: DimensionRow = diesel::sql_query(
        "SELECT atttypmod AS dims FROM pg_attribute \
         WHERE attrelid = 'message_embedding'::regclass AND attname = 'embedding'",
    )
    .get_result(conn)
    .map_err(MemoryError::from)?;
    Ok(row.dims)
}

/// Refuse a destructive dimension migration when any row already has a
/// real (non-placeholder) embedding.
pub fn any_embedded(conn: &mut PgConnection) -> Result<bool> {
    let count: i64 = message_embedding::table
        .filter(message_embedding::is_embedded.eq(true))
        .count()
        .get_result(conn)
        .map_err(MemoryError::from)?;
    Ok(count > 0)
}

pub fn soft_delete_for_session(conn: &mut PgConnection, session_id: Uuid) -> Result<()> {
    diesel::update(
        message_embedding::table
            .filter(message_embedding::session_id.eq(session_id))
            .filter(message_embedding::deleted_at.is_null()),
    )
    .set((
        message_embedding::deleted_at.eq(Some(Utc::now())),
        message_embedding::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .map_err(MemoryError::from)?;
    Ok(())
}

pub fn purge_older_than(conn: &mut PgConnection, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
    diesel::delete(message_embedding::table.filter(message_embedding::deleted_at.lt(cutoff)))
        .execute(conn)
        .map_err(MemoryError::from)
}
