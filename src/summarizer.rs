//! C2 — rolling summarization.
//!
//! The token-budget batching walk is pure logic over already-fetched
//! messages; the LM call itself is behind the [`Summarizer`] trait so the
//! model is pluggable, same split as `embedder`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::store::Message;

pub const SUMMARY_INSTRUCTION: &str = "You are a conversation summarizer. Produce a concise summary \
that lets a reader resume the conversation after older turns are replaced by this summary. \
Cover: (1) what the conversation is about and any constraints established, (2) what has been \
decided or completed so far, (3) what would logically come next. Keep it under 100 words and \
preserve concrete details: names, decisions, and preferences.";

/// `T_max = model context budget - T_summary_reserve - T_buffer`.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudgetConfig {
    /// `W` — message-window size gating whether compaction is warranted at
    /// all, distinct from the store's `memory.message_window` read default.
    pub window: i64,
    pub model_context_tokens: usize,
    pub summary_reserve: usize,
    pub buffer: usize,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            window: 12,
            model_context_tokens: 8192,
            summary_reserve: 512,
            buffer: 230,
        }
    }
}

impl TokenBudgetConfig {
    pub fn t_max(&self) -> usize {
        self.model_context_tokens
            .saturating_sub(self.summary_reserve)
            .saturating_sub(self.buffer)
    }
}

/// Whether the candidate message count justifies running a compaction pass
/// at all.
pub fn is_compaction_warranted(candidate_count: usize, window: i64) -> bool {
    candidate_count as i64 > window
}

/// Rough token estimate for messages an upstream enricher hasn't counted
/// yet (`token_count == 0`).
fn estimate_tokens(content: &str) -> usize {
    (content.len() / 4).max(1)
}

fn effective_tokens(message: &Message) -> usize {
    if message.token_count > 0 {
        message.token_count as usize
    } else {
        estimate_tokens(&message.content)
    }
}

#[derive(Debug, Clone)]
pub struct SummarizeOutput {
    pub content: String,
    pub token_count: i32,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub content: String,
    pub token_count: i32,
    pub summary_point_uuid: Uuid,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, previous_summary: &str, batch: &str) -> anyhow::Result<SummarizeOutput>;
}

fn format_batch(batch: &[&Message]) -> String {
    batch
        .iter()
        .map(|m| format!("[{}]: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Walk `messages` (chronological, all newer than the current summary
/// point) accumulating tokens; whenever the running total would exceed
/// `T_max`, run one incremental summarization step and start a new batch.
/// Returns `None` when there's nothing to summarize.
pub async fn run_batched_summarization(
    summarizer: &dyn Summarizer,
    previous_summary: Option<&str>,
    messages: &[Message],
    cfg: &TokenBudgetConfig,
) -> anyhow::Result<Option<BatchResult>> {
    if messages.is_empty() {
        return Ok(None);
    }

    let t_max = cfg.t_max();
    let mut current_summary = previous_summary.unwrap_or_default().to_string();
    let mut total_tokens: i32 = 0;
    let mut batch: Vec<&Message> = Vec::new();
    let mut running_tokens: usize = 0;
    let mut last_uuid: Option<Uuid> = None;

    for message in messages {
        let tokens = effective_tokens(message);

        if !batch.is_empty() && running_tokens + tokens > t_max {
            let output = summarizer
                .summarize(&current_summary, &format_batch(&batch))
                .await?;
            current_summary = output.content;
            total_tokens += output.token_count;
            last_uuid = Some(batch.last().expect("checked non-empty").id);
            batch.clear();
            running_tokens = 0;
        }

        running_tokens += tokens;
        batch.push(message);
    }

    if !batch.is_empty() {
        let output = summarizer
            .summarize(&current_summary, &format_batch(&batch))
            .await?;
        current_summary = output.content;
        total_tokens += output.token_count;
        last_uuid = Some(batch.last().expect("checked non-empty").id);
    }

    Ok(last_uuid.map(|summary_point_uuid| BatchResult {
        content: current_summary,
        token_count: total_tokens,
        summary_point_uuid,
    }))
}

/// HTTP-backed summarizer speaking an OpenAI-style `/chat/completions`
/// endpoint, with a couple of retries on transient failure before giving up
/// and letting the caller's natural retry-on-next-event take over.
pub struct LmSummarizer {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    max_retries: usize,
}

impl LmSummarizer {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            model: model.into(),
            client: reqwest::Client::new(),
            max_retries: 2,
        }
    }

    async fn call_once(&self, previous_summary: &str, batch: &str) -> anyhow::Result<SummarizeOutput> {
        let user_prompt = format!(
            "Previous summary (empty if none):\n{previous_summary}\n\nNew messages:\n{batch}"
        );

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .json(&serde_json::json!({
                "model": &self.model,
                "messages": [
                    {"role": "system", "content": SUMMARY_INSTRUCTION},
                    {"role": "user", "content": user_prompt},
                ],
            }));

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("summarization API returned status {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("summarization API response missing message content"))?
            .to_string();

        let token_count = body["usage"]["total_tokens"]
            .as_i64()
            .unwrap_or_else(|| estimate_tokens(&content) as i64) as i32;

        Ok(SummarizeOutput { content, token_count })
    }
}

#[async_trait]
impl Summarizer for LmSummarizer {
    async fn summarize(&self, previous_summary: &str, batch: &str) -> anyhow::Result<SummarizeOutput> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.call_once(previous_summary, batch).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    tracing::warn!("summarization attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("summarization failed")))
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Deterministic summarizer for unit tests: echoes the batch's message
    /// count so token-budget batching can be asserted without a network call.
    pub struct FakeSummarizer;

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, previous_summary: &str, batch: &str) -> anyhow::Result<SummarizeOutput> {
            let content = if previous_summary.is_empty() {
                format!("summary of: {batch}")
            } else {
                format!("{previous_summary} | {batch}")
            };
            Ok(SummarizeOutput {
                token_count: content.len() as i32 / 4,
                content,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeSummarizer;
    use super::*;
    use chrono::Utc;

    fn message(id: Uuid, content: &str, tokens: i32) -> Message {
        Message {
            sequence_id: 0,
            id,
            session_id: Uuid::new_v4(),
            role: "user".to_string(),
            role_type: "user".to_string(),
            content: content.to_string(),
            token_count: tokens,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn warranted_gate_respects_window() {
        assert!(!is_compaction_warranted(4, 4));
        assert!(is_compaction_warranted(5, 4));
    }

    #[tokio::test]
    async fn empty_messages_yields_no_batch_result() {
        let result = run_batched_summarization(&FakeSummarizer, None, &[], &TokenBudgetConfig::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn single_small_batch_covers_all_messages() {
        let messages = vec![message(Uuid::new_v4(), "hi", 10), message(Uuid::new_v4(), "there", 10)];
        let last_id = messages.last().unwrap().id;

        let result = run_batched_summarization(&FakeSummarizer, None, &messages, &TokenBudgetConfig::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.summary_point_uuid, last_id);
    }

    #[tokio::test]
    async fn oversized_batch_splits_into_multiple_summarization_calls() {
        let cfg = TokenBudgetConfig {
            window: 1,
            model_context_tokens: 1000,
            summary_reserve: 0,
            buffer: 0,
        };
        // t_max = 1000; each message "costs" 600 tokens, so the third one
        // forces a flush after the first two are batched together.
        let messages = vec![
            message(Uuid::new_v4(), "a", 600),
            message(Uuid::new_v4(), "b", 600),
            message(Uuid::new_v4(), "c", 600),
        ];
        let last_id = messages.last().unwrap().id;

        let result = run_batched_summarization(&FakeSummarizer, None, &messages, &cfg)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.summary_point_uuid, last_id);
        // Two summarization calls happened: the fake summarizer's output
        // chains `previous | batch`, so the final content contains both a
        // prior-summary marker and the last batch's text.
        assert!(result.content.contains('|'));
    }
}
