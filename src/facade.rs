//! C6 — the public memory API: thin orchestration over `Store`
//! and the pluggable `Embedder`, independent of the HTTP transport.

use std::sync::Arc;
use uuid::Uuid;

use crate::embedder::Embedder;
use crate::error::{MemoryError, Result};
use crate::search::{MetadataFilter, SearchResult};
use crate::store::{Message, MessageInput, Session, Store, Summary};

#[derive(Debug, Clone)]
pub struct GetMemoryResult {
    pub messages: Vec<Message>,
    pub summary: Option<Summary>,
}

/// Pins the single `project_id` this deployment serves — fixed per process
/// rather than threaded through every HTTP request.
pub struct MemoryFacade {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    project_id: Uuid,
    message_window: i64,
}

impl MemoryFacade {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>, project_id: Uuid, message_window: i64) -> Self {
        Self {
            store,
            embedder,
            project_id,
            message_window,
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    /// Reads the current summary plus the selected message window.
    /// `NotFound` when the session itself doesn't exist, or when it exists
    /// but has no messages and no summary yet.
    pub async fn get_memory(&self, session_id: String, last_n: i64) -> Result<GetMemoryResult> {
        if last_n < 0 {
            return Err(MemoryError::bad_request("last_n must not be negative"));
        }

        let summary = self
            .store
            .get_summary(self.project_id, session_id.clone())
            .await?;

        let messages = self
            .store
            .get_messages(
                self.project_id,
                session_id,
                self.message_window,
                summary.clone(),
                last_n,
            )
            .await?;

        if messages.is_empty() && summary.is_none() {
            return Err(MemoryError::NotFound);
        }

        Ok(GetMemoryResult { messages, summary })
    }

    /// `postMemory`: lazily creates the session via the message
    /// write itself, then folds in any session-level metadata/user_id update
    /// in the same call (update-then-create upsert semantics).
    pub async fn post_memory(
        &self,
        session_id: String,
        inputs: Vec<MessageInput>,
        session_metadata: Option<serde_json::Value>,
        user_id: Option<String>,
        privileged: bool,
    ) -> Result<Vec<Message>> {
        let saved = self
            .store
            .put_messages(self.project_id, session_id.clone(), inputs, false)
            .await?;

        if session_metadata.is_some() || user_id.is_some() {
            let metadata = session_metadata.unwrap_or_else(|| serde_json::json!({}));
            self.store
                .update_session(self.project_id, session_id, metadata, false, privileged)
                .await?;
            // user_id is set only at session creation in this schema; nothing
            // further to do here beyond the metadata merge above.
        }

        Ok(saved)
    }

    pub async fn delete_memory(&self, session_id: String) -> Result<()> {
        self.store.delete_session(self.project_id, session_id).await
    }

    /// `searchMemory`: embeds `query_text` and runs the
    /// cosine-distance search, optionally narrowed by a metadata filter.
    pub async fn search_memory(
        &self,
        session_id: String,
        query_text: String,
        filter: Option<MetadataFilter>,
        limit: i64,
    ) -> Result<Vec<SearchResult>> {
        if query_text.is_empty() {
            return Err(MemoryError::bad_request("search text must not be empty"));
        }

        let mut embeddings = self
            .embedder
            .embed(&[query_text])
            .await
            .map_err(|e| MemoryError::storage("failed to embed search query", e))?;

        let Some(query_embedding) = embeddings.pop() else {
            return Err(MemoryError::storage(
                "embedder returned no vector for the search query",
                anyhow::anyhow!("empty embedding response"),
            ));
        };

        self.store
            .search_messages(self.project_id, session_id, query_embedding.vector, filter, limit)
            .await
    }

    pub async fn create_session(
        &self,
        session_id: String,
        user_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<Session> {
        self.store
            .create_session(self.project_id, session_id, user_id, metadata)
            .await
    }

    pub async fn get_session(&self, session_id: String) -> Result<Option<Session>> {
        self.store.get_session(self.project_id, session_id).await
    }

    pub async fn update_session(
        &self,
        session_id: String,
        metadata: serde_json::Value,
        privileged: bool,
    ) -> Result<Session> {
        self.store
            .update_session(self.project_id, session_id, metadata, true, privileged)
            .await
    }

    pub async fn list_sessions(&self, cursor: i64, limit: i64) -> Result<Vec<Session>> {
        self.store.list_sessions(self.project_id, cursor, limit).await
    }

    pub async fn store_list_sessions_ordered(
        &self,
        page: i64,
        size: i64,
        order_by: crate::store::OrderBy,
        asc: bool,
    ) -> Result<(Vec<Session>, i64)> {
        self.store
            .list_sessions_ordered(self.project_id, page, size, order_by, asc)
            .await
    }
}
