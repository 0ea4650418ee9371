//! C4 — the extractor bus: fans a [`MessageEvent`] out to background
//! enrichers (summarizer, embedder) after a `putMessages` commit, and the
//! per-session lock registry that keeps at most one compaction pass running
//! per session at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

use crate::embedder::Embedder;
use crate::store::{Message, MessageEvent, Store};
use crate::summarizer::{is_compaction_warranted, run_batched_summarization, Summarizer, TokenBudgetConfig};

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, event: MessageEvent) -> anyhow::Result<()>;
}

/// Lazily-created per-session mutex registry, guarded by a std mutex for the
/// rare insert path. One lock per session, created on first use.
#[derive(Default)]
pub struct SessionLocks {
    locks: StdMutex<HashMap<Uuid, Arc<TokioMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_internal_id: Uuid) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock registry poisoned");
        locks
            .entry(session_internal_id)
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

    /// Acquire the per-session lock, blocking until any other compaction for
    /// the same session releases it.
    pub async fn acquire(&self, session_internal_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        self.entry(session_internal_id).lock_owned().await
    }
}

/// Registers extractors and fans events out to each of them independently;
/// one extractor's failure doesn't stop the others — it's logged and
/// swallowed, never propagated back to the write that triggered it.
#[derive(Default)]
pub struct ExtractorBus {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    /// Fire-and-forget: each extractor runs on its own spawned task so a slow
    /// or hung extractor never blocks the `putMessages` caller, which has
    /// already received its response by the time this runs.
    pub fn publish(&self, event: MessageEvent) {
        for extractor in &self.extractors {
            let extractor = extractor.clone();
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = extractor.notify(event).await {
                    tracing::warn!(extractor = extractor.name(), error = %e, "extractor failed");
                }
            });
        }
    }
}

/// Runs the rolling-summary compaction whenever a `MessageEvent`
/// pushes the live-message count past the configured window.
pub struct SummarizerExtractor {
    store: Arc<Store>,
    summarizer: Arc<dyn Summarizer>,
    locks: Arc<SessionLocks>,
    config: TokenBudgetConfig,
}

impl SummarizerExtractor {
    pub fn new(
        store: Arc<Store>,
        summarizer: Arc<dyn Summarizer>,
        locks: Arc<SessionLocks>,
        config: TokenBudgetConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            locks,
            config,
        }
    }
}

#[async_trait]
impl Extractor for SummarizerExtractor {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    async fn notify(&self, event: MessageEvent) -> anyhow::Result<()> {
        let candidate_count = self.store.count_live_messages(event.session_internal_id).await?;
        if !is_compaction_warranted(candidate_count as usize, self.config.window) {
            return Ok(());
        }

        // Hold the per-session lock for the whole read-summarize-write cycle
        // so two events for the same session never run compaction concurrently.
        let _guard = self.locks.acquire(event.session_internal_id).await;

        let previous = self.store.get_summary_for_session(event.session_internal_id).await?;
        let candidates: Vec<Message> = self
            .store
            .messages_since_pivot(event.session_internal_id, previous.clone())
            .await?;

        let Some(batch) = run_batched_summarization(
            self.summarizer.as_ref(),
            previous.as_ref().map(|s| s.content.as_str()),
            &candidates,
            &self.config,
        )
        .await?
        else {
            return Ok(());
        };

        self.store
            .put_summary_for_session(
                event.session_internal_id,
                batch.content,
                batch.token_count,
                batch.summary_point_uuid,
                serde_json::json!({}),
            )
            .await?;

        Ok(())
    }
}

/// Computes and stores embeddings for newly-written messages. Idempotent:
/// embedding writes are matched on `message_uuid`, so no session-level lock
/// is needed here.
pub struct EmbedderExtractor {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
}

impl EmbedderExtractor {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Extractor for EmbedderExtractor {
    fn name(&self) -> &'static str {
        "embedder"
    }

    async fn notify(&self, event: MessageEvent) -> anyhow::Result<()> {
        if event.messages.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = event.messages.iter().map(|m| m.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let Some(message) = event.messages.get(embedding.index) else {
                continue;
            };
            vectors.push((message.id, embedding.vector));
        }

        if vectors.is_empty() {
            return Ok(());
        }

        self.store
            .put_message_embeddings_for_session(event.session_internal_id, vectors)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_locks_serialize_same_session_access() {
        let locks = SessionLocks::new();
        let session = Uuid::new_v4();

        let guard = locks.acquire(session).await;
        let attempted = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(session)).await;
        assert!(attempted.is_err(), "second acquire for the same session should block");

        drop(guard);
        let now_free = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(session)).await;
        assert!(now_free.is_ok(), "lock releases after the guard drops");
    }

    #[tokio::test]
    async fn session_locks_do_not_contend_across_sessions() {
        let locks = SessionLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _guard_a = locks.acquire(a).await;
        let attempt_b = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(b)).await;
        assert!(attempt_b.is_ok(), "distinct sessions must not share a lock");
    }
}
