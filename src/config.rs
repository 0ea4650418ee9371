use anyhow::{Context, Result};
use uuid::Uuid;

/// Process-wide configuration, loaded from the environment.
///
/// Covers message windowing, extractor enablement, embedding dimensions,
/// the store DSN, server port, and the purge sweep interval. Auth is the
/// HTTP layer's concern and not read here.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_port: u16,

    /// This deployment's project scope — fixed per process rather than
    /// threaded through every request.
    pub project_id: Uuid,

    /// `memory.message_window` — default count of most-recent messages
    /// considered "live" for the default memory read.
    pub message_window: i64,

    pub summarizer_enabled: bool,
    pub embeddings_enabled: bool,
    pub embedding_dimensions: usize,

    pub embedding_api_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,

    pub summarizer_api_url: String,
    pub summarizer_api_key: Option<String>,
    pub summarizer_model: String,

    /// Minutes between purge sweeps of soft-deleted rows; 0 disables.
    pub purge_every_minutes: u64,

    /// DB connection pool size; defaults to 4x the number of available cores.
    pub pool_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            server_port: std::env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,

            project_id: match std::env::var("PROJECT_ID") {
                Ok(v) => Uuid::parse_str(&v).context("PROJECT_ID must be a valid UUID")?,
                Err(_) => Uuid::nil(),
            },

            message_window: std::env::var("MEMORY_MESSAGE_WINDOW")
                .unwrap_or_else(|_| "12".to_string())
                .parse()
                .context("MEMORY_MESSAGE_WINDOW must be an integer")?,

            summarizer_enabled: env_bool("EXTRACTORS_SUMMARIZER_ENABLED", true),
            embeddings_enabled: env_bool("EXTRACTORS_EMBEDDINGS_ENABLED", true),

            embedding_dimensions: std::env::var("EXTRACTORS_EMBEDDINGS_DIMENSIONS")
                .unwrap_or_else(|_| "1536".to_string())
                .parse()
                .context("EXTRACTORS_EMBEDDINGS_DIMENSIONS must be an integer")?,

            embedding_api_url: std::env::var("EMBEDDING_API_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),

            summarizer_api_url: std::env::var("SUMMARIZER_API_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
            summarizer_api_key: std::env::var("SUMMARIZER_API_KEY").ok(),
            summarizer_model: std::env::var("SUMMARIZER_MODEL")
                .unwrap_or_else(|_| "llama3".to_string()),

            purge_every_minutes: std::env::var("DATA_PURGE_EVERY")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("DATA_PURGE_EVERY must be an integer")?,

            pool_size: std::env::var("STORE_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| 4 * num_cpus_fallback()),
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

/// Rough GOMAXPROCS-equivalent without pulling in a CPU-count crate the rest
/// of the stack doesn't otherwise need.
fn num_cpus_fallback() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}
