use std::sync::Arc;

use anyhow::Result;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convomem::config::Config;
use convomem::embedder::{Embedder, HttpEmbedder};
use convomem::extractor::{EmbedderExtractor, ExtractorBus, SessionLocks, SummarizerExtractor};
use convomem::facade::MemoryFacade;
use convomem::store::{build_pool, Store};
use convomem::summarizer::{LmSummarizer, Summarizer, TokenBudgetConfig};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "convomem=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    info!(port = config.server_port, "configuration loaded");

    {
        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
        info!("database migrations applied");
    }

    let pool = build_pool(&config.database_url, config.pool_size)?;
    let store = Arc::new(Store::new(pool, config.embeddings_enabled, config.embedding_dimensions));

    if config.embeddings_enabled {
        store
            .ensure_embedding_dimension(config.embedding_dimensions)
            .await?;
    }

    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        config.embedding_api_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.embedding_dimensions,
    ));

    // Wire the extractor bus before installing it on the store: extractors
    // hold their own `Arc<Store>` clone rather than reaching back through the
    // bus, so there's no cycle between `Store` and `ExtractorBus`.
    let mut bus = ExtractorBus::new();

    if config.summarizer_enabled {
        let summarizer: Arc<dyn Summarizer> = Arc::new(LmSummarizer::new(
            config.summarizer_api_url.clone(),
            config.summarizer_api_key.clone(),
            config.summarizer_model.clone(),
        ));
        let locks = Arc::new(SessionLocks::new());
        let token_budget = TokenBudgetConfig {
            window: config.message_window,
            ..TokenBudgetConfig::default()
        };
        bus.attach(Arc::new(SummarizerExtractor::new(
            store.clone(),
            summarizer,
            locks,
            token_budget,
        )));
        info!("summarizer extractor enabled");
    }

    if config.embeddings_enabled {
        bus.attach(Arc::new(EmbedderExtractor::new(store.clone(), embedder.clone())));
        info!("embedder extractor enabled");
    }

    store.install_bus(bus);

    let facade = Arc::new(MemoryFacade::new(
        store.clone(),
        embedder,
        config.project_id,
        config.message_window,
    ));

    if config.purge_every_minutes > 0 {
        let purge_store = store.clone();
        let purge_every_minutes = config.purge_every_minutes;
        let every = std::time::Duration::from_secs(purge_every_minutes * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let cutoff = chrono::Utc::now() - chrono::Duration::minutes(purge_every_minutes as i64);
                match purge_store.purge_deleted(cutoff).await {
                    Ok(report) => info!(?report, "purge sweep completed"),
                    Err(e) => warn!(error = %e, "purge sweep failed"),
                }
            }
        });
        info!(every_minutes = config.purge_every_minutes, "purge sweep scheduled");
    }

    let router = convomem::http::router(facade);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server_port)).await?;
    info!(port = config.server_port, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
