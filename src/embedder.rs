//! C3 — pluggable embedding generation.

use async_trait::async_trait;
use tracing::warn;

/// One embedded input, carrying the index of the input it corresponds to so
/// callers can reassemble batches.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub index: usize,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension `D` this embedder produces; pinned by the store at schema
    /// creation time.
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>>;
}

/// HTTP-backed embedder speaking the OpenAI-style `/embeddings` endpoint
/// shape.
pub struct HttpEmbedder {
    api_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            model: model.into(),
            dimensions,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.api_url))
            .json(&serde_json::json!({
                "model": &self.model,
                "input": texts,
                "encoding_format": "float",
            }));

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            anyhow::bail!("embedding API returned status {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let data = body["data"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("embedding API response missing `data` array"))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let index = item["index"].as_u64().unwrap_or(embeddings.len() as u64) as usize;
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("embedding item missing `embedding` array"))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();

            if vector.len() != self.dimensions {
                warn!(
                    "embedding API returned dimension {} (expected {})",
                    vector.len(),
                    self.dimensions
                );
            }

            embeddings.push(Embedding { index, vector });
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Deterministic embedder for unit tests: returns a fixed vector derived
    /// from the input's length, so two equal inputs hash to equal vectors
    /// without a network call.
    pub struct FakeEmbedder {
        pub dimensions: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, text)| {
                    let seed = text.len() as f32;
                    Embedding {
                        index,
                        vector: vec![seed; self.dimensions],
                    }
                })
                .collect())
        }
    }
}
