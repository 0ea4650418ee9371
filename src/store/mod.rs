//! C1 — durable persistence of sessions, messages, summaries, and message
//! embeddings. `Store` is the single point of entry; it checks
//! out pooled connections, wraps multi-step writes in transactions, and
//! fans a [`MessageEvent`] out to whatever [`ExtractorBus`] has been
//! installed once startup wiring is complete.

mod embeddings;
mod json_merge;
mod locks;
pub mod models;
mod pool;
mod sessions;
mod summaries;
mod users;

mod messages;

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::extractor::ExtractorBus;
use crate::search::{self, MetadataFilter, SearchResult};

pub use messages::MetadataEntry;
pub use models::{
    Message, MessageEmbeddingRow, MessageEvent, MessageInput, NewSession, RoleType, Session,
    Summary,
};
pub use pool::{build_pool, PgPool};
pub use sessions::OrderBy;

#[derive(Debug, Default, Clone, Copy)]
pub struct PurgeReport {
    pub sessions: usize,
    pub messages: usize,
    pub summaries: usize,
    pub embeddings: usize,
}

pub struct Store {
    pool: PgPool,
    embeddings_enabled: bool,
    embedding_dimensions: usize,
    bus: OnceLock<ExtractorBus>,
}

impl Store {
    pub fn new(pool: PgPool, embeddings_enabled: bool, embedding_dimensions: usize) -> Self {
        Self {
            pool,
            embeddings_enabled,
            embedding_dimensions,
            bus: OnceLock::new(),
        }
    }

    /// Wire the process-wide extractor registry. Called once during startup,
    /// before the store serves any writes; a second call is a silent no-op
    /// (mirrors `OnceLock::set` semantics) since there is never a legitimate
    /// reason to swap the bus at runtime.
    pub fn install_bus(&self, bus: ExtractorBus) {
        let _ = self.bus.set(bus);
    }

    fn conn(&self) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>> {
        self.pool.get().map_err(MemoryError::from)
    }

    fn publish(&self, event: MessageEvent) {
        if let Some(bus) = self.bus.get() {
            bus.publish(event);
        }
    }

    // ---------------------------------------------------------------- sessions

    pub async fn create_session(
        &self,
        project_id: Uuid,
        session_id: String,
        user_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<Session> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            sessions::create(&mut conn, project_id, &session_id, user_id.as_deref(), metadata)
        })
        .await
    }

    /// "Row not found" returns `Ok(None)`, not `Err(NotFound)` — callers
    /// that need a hard error translate this themselves.
    pub async fn get_session(&self, project_id: Uuid, session_id: String) -> Result<Option<Session>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            sessions::get_by_external_id(&mut conn, project_id, &session_id)
        })
        .await
    }

    pub async fn update_session(
        &self,
        project_id: Uuid,
        session_id: String,
        metadata: serde_json::Value,
        undelete: bool,
        privileged: bool,
    ) -> Result<Session> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| {
                sessions::update(conn, project_id, &session_id, metadata, undelete, privileged)
            })
        })
        .await
    }

    pub async fn list_sessions(
        &self,
        project_id: Uuid,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<Session>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            sessions::list(&mut conn, project_id, cursor, limit)
        })
        .await
    }

    pub async fn list_sessions_ordered(
        &self,
        project_id: Uuid,
        page: i64,
        size: i64,
        order_by: OrderBy,
        asc: bool,
    ) -> Result<(Vec<Session>, i64)> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            sessions::list_ordered(&mut conn, project_id, page, size, order_by, asc)
        })
        .await
    }

    /// Soft-deletes the session and, in the same transaction, cascades the
    /// soft-delete to its messages, summaries, and embeddings — explicit
    /// delete order, not FK cascade.
    pub async fn delete_session(&self, project_id: Uuid, session_id: String) -> Result<()> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| -> Result<()> {
                let Some(session) = sessions::find_any(conn, project_id, &session_id)? else {
                    return Err(MemoryError::NotFound);
                };
                sessions::soft_delete(conn, session.id)?;
                messages::soft_delete_for_session(conn, session.id)?;
                summaries::soft_delete_for_session(conn, session.id)?;
                embeddings::soft_delete_for_session(conn, session.id)?;
                Ok(())
            })
        })
        .await
    }

    // ---------------------------------------------------------------- messages

    /// Lazily creates the session if absent, upserts the message batch, and
    /// (when embeddings are enabled) inserts placeholder embedding rows in
    /// the same transaction. Publishes a [`MessageEvent`] after commit
    /// unless `skip_notify` is set.
    pub async fn put_messages(
        &self,
        project_id: Uuid,
        session_id: String,
        inputs: Vec<MessageInput>,
        skip_notify: bool,
    ) -> Result<Vec<Message>> {
        let pool = self.pool.clone();
        let embeddings_enabled = self.embeddings_enabled;
        let embedding_dimensions = self.embedding_dimensions;
        let session_id_for_tx = session_id.clone();

        let (session, saved) = blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| -> Result<(Session, Vec<Message>)> {
                let session = sessions::ensure_exists(conn, project_id, &session_id_for_tx)?;
                if session.is_ended() {
                    return Err(MemoryError::SessionEnded);
                }

                let saved = messages::put_messages(conn, session.id, &inputs)?;

                if embeddings_enabled {
                    let ids: Vec<Uuid> = saved.iter().map(|m| m.id).collect();
                    embeddings::insert_placeholders(conn, session.id, &ids, embedding_dimensions)?;
                }

                Ok((session, saved))
            })
        })
        .await?;

        if !skip_notify && !saved.is_empty() {
            self.publish(MessageEvent {
                session_internal_id: session.id,
                session_id,
                messages: saved.clone(),
            });
        }

        Ok(saved)
    }

    pub async fn get_messages(
        &self,
        project_id: Uuid,
        session_id: String,
        window_size: i64,
        summary: Option<Summary>,
        last_n: i64,
    ) -> Result<Vec<Message>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let Some(session) = sessions::get_by_external_id(&mut conn, project_id, &session_id)?
            else {
                return Err(MemoryError::NotFound);
            };

            let pivot = match summary {
                Some(s) => messages::pivot_sequence(&mut conn, session.id, s.summary_point_uuid)?,
                None => None,
            };

            messages::get_messages(&mut conn, session.id, window_size, pivot, last_n)
        })
        .await
    }

    pub async fn put_message_metadata(
        &self,
        session_id: String,
        entries: Vec<MetadataEntry>,
        privileged: bool,
    ) -> Result<()> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| {
                messages::put_message_metadata(conn, &session_id, &entries, privileged)
            })
        })
        .await
    }

    // ---------------------------------------------------------------- summaries

    pub async fn put_summary(
        &self,
        project_id: Uuid,
        session_id: String,
        content: String,
        token_count: i32,
        summary_point_uuid: Uuid,
        metadata: serde_json::Value,
    ) -> Result<Summary> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let Some(session) = sessions::get_by_external_id(&mut conn, project_id, &session_id)?
            else {
                return Err(MemoryError::NotFound);
            };
            summaries::put(
                &mut conn,
                session.id,
                &content,
                token_count,
                summary_point_uuid,
                metadata,
            )
        })
        .await
    }

    pub async fn get_summary(&self, project_id: Uuid, session_id: String) -> Result<Option<Summary>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let Some(session) = sessions::get_by_external_id(&mut conn, project_id, &session_id)?
            else {
                return Ok(None);
            };
            summaries::get_latest(&mut conn, session.id)
        })
        .await
    }

    // ------------------------------------------------------------- extractors
    //
    // The methods below operate on the internal session id directly. They
    // exist for extractors, which only ever see a `MessageEvent`
    // carrying `session_internal_id` — not the caller's `project_id` — since
    // that event is published after the owning write has already resolved
    // project scoping once.

    pub async fn get_summary_for_session(&self, session_internal_id: Uuid) -> Result<Option<Summary>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            summaries::get_latest(&mut conn, session_internal_id)
        })
        .await
    }

    /// All live messages after the given summary's pivot, or every live
    /// message when there's no summary yet — the same case-2/case-3 policy
    /// `get_messages` uses, without a `last_n` override.
    pub async fn messages_since_pivot(
        &self,
        session_internal_id: Uuid,
        pivot_summary: Option<Summary>,
    ) -> Result<Vec<Message>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let pivot = match pivot_summary {
                Some(s) => messages::pivot_sequence(&mut conn, session_internal_id, s.summary_point_uuid)?,
                None => None,
            };
            messages::get_messages(&mut conn, session_internal_id, i64::MAX, pivot, 0)
        })
        .await
    }

    pub async fn count_live_messages(&self, session_internal_id: Uuid) -> Result<i64> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            messages::count_live(&mut conn, session_internal_id)
        })
        .await
    }

    pub async fn put_summary_for_session(
        &self,
        session_internal_id: Uuid,
        content: String,
        token_count: i32,
        summary_point_uuid: Uuid,
        metadata: serde_json::Value,
    ) -> Result<Summary> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            summaries::put(
                &mut conn,
                session_internal_id,
                &content,
                token_count,
                summary_point_uuid,
                metadata,
            )
        })
        .await
    }

    pub async fn put_message_embeddings_for_session(
        &self,
        session_internal_id: Uuid,
        vectors: Vec<(Uuid, Vec<f32>)>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| embeddings::put_vectors(conn, session_internal_id, &vectors))
        })
        .await
    }

    // --------------------------------------------------------------- embeddings

    pub async fn get_message_vectors(
        &self,
        project_id: Uuid,
        session_id: String,
        message_uuids: Vec<Uuid>,
    ) -> Result<Vec<MessageEmbeddingRow>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let Some(session) = sessions::get_by_external_id(&mut conn, project_id, &session_id)?
            else {
                return Err(MemoryError::NotFound);
            };
            embeddings::get_vectors(&mut conn, session.id, &message_uuids)
        })
        .await
    }

    pub async fn put_message_embeddings(
        &self,
        project_id: Uuid,
        session_id: String,
        vectors: Vec<(Uuid, Vec<f32>)>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let Some(session) = sessions::get_by_external_id(&mut conn, project_id, &session_id)?
            else {
                return Err(MemoryError::NotFound);
            };
            conn.transaction(|conn| embeddings::put_vectors(conn, session.id, &vectors))
        })
        .await
    }

    /// Compares the configured embedding dimension against what the
    /// `embedding` column is actually declared with and, if they differ,
    /// runs the destructive migration to bring the column in line. Called
    /// once at startup.
    pub async fn ensure_embedding_dimension(&self, expected_dimensions: usize) -> Result<()> {
        let pool = self.pool.clone();
        let current = blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            embeddings::current_dimension(&mut conn)
        })
        .await?;

        if current as usize == expected_dimensions {
            return Ok(());
        }

        self.migrate_embedding_dimension(expected_dimensions).await
    }

    /// Destructive: drops and re-adds the embedding column at a new
    /// dimension. Refuses when any row already holds a real embedding
    ///.
    pub async fn migrate_embedding_dimension(&self, new_dimensions: usize) -> Result<()> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| -> Result<()> {
                if embeddings::any_embedded(conn)? {
                    return Err(MemoryError::bad_request(
                        "refusing destructive embedding dimension migration: rows already embedded",
                    ));
                }

                let zero = vec![0.0f64; new_dimensions]
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",");

                diesel::sql_query("ALTER TABLE message_embedding DROP COLUMN embedding")
                    .execute(conn)
                    .map_err(MemoryError::from)?;
                diesel::sql_query(format!(
                    "ALTER TABLE message_embedding ADD COLUMN embedding vector({new_dimensions}) NOT NULL DEFAULT '[{zero}]'"
                ))
                .execute(conn)
                .map_err(MemoryError::from)?;

                Ok(())
            })
        })
        .await
    }

    // -------------------------------------------------------------------- search

    pub async fn search_messages(
        &self,
        project_id: Uuid,
        session_id: String,
        query_vector: Vec<f32>,
        filter: Option<MetadataFilter>,
        limit: i64,
    ) -> Result<Vec<SearchResult>> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            let Some(session) = sessions::get_by_external_id(&mut conn, project_id, &session_id)?
            else {
                return Err(MemoryError::NotFound);
            };
            let vector = pgvector::Vector::from(query_vector);
            search::search_by_vector(&mut conn, session.id, &vector, filter.as_ref(), limit)
        })
        .await
    }

    // ------------------------------------------------------------------ purge

    /// Hard-delete rows soft-deleted before `cutoff`, in FK-safe order
    /// (embeddings/summaries/messages before sessions). Does not cascade
    /// into summaries whose pivot message has just been purged — a
    /// dangling `summary_point_uuid` is left as-is rather than rewritten.
    pub async fn purge_deleted(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let pool = self.pool.clone();
        blocking(move || {
            let mut conn = pool.get().map_err(MemoryError::from)?;
            conn.transaction(|conn| -> Result<PurgeReport> {
                let embeddings = embeddings::purge_older_than(conn, cutoff)?;
                let summaries = summaries::purge_older_than(conn, cutoff)?;
                let messages = messages::purge_older_than(conn, cutoff)?;
                let sessions = sessions::purge_older_than(conn, cutoff)?;
                Ok(PurgeReport {
                    sessions,
                    messages,
                    summaries,
                    embeddings,
                })
            })
        })
        .await
    }
}

/// Run a blocking Diesel closure on the blocking thread pool, matching the
/// crate's all-async public surface without pulling in `diesel-async`.
/// Suspension happens at this boundary — cancellation above it is
/// cooperative at the next DB call.
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MemoryError::storage("blocking task panicked", anyhow::anyhow!(e)))?
}
