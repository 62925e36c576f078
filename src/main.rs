use std::sync::Arc;

use anyhow::Context;
use folio::app::{router, AppState};
use folio::config::AppConfig;
use folio::db::change_stream::{ChangeFeed, MongoChangeFeed};
use folio::db::repository::{MongoPageRepository, PageRepository};
use folio::search::index::{SearchIndex, SearchIndexOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio=info,tower_http=info".into()),
        )
        .init();

    tracing::info!("Starting Folio server...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Connect to MongoDB
    let mongo_client = mongodb::Client::with_uri_str(&config.mongodb_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let mongo_db = mongo_client.database(&config.mongodb_database);

    let page_repo = Arc::new(MongoPageRepository::new(&mongo_db));
    page_repo
        .ensure_indexes()
        .await
        .context("Failed to create page indexes")?;
    let pages: Arc<dyn PageRepository> = page_repo;
    let feed: Arc<dyn ChangeFeed> = Arc::new(MongoChangeFeed::new(&mongo_db));

    tracing::info!("Connected to MongoDB at {}", config.redacted_mongodb_uri());

    // Open and build the search index
    let index_path = config.index_path();
    let search = Arc::new(
        SearchIndex::open(
            &index_path,
            pages.clone(),
            SearchIndexOptions::from_config(&config),
        )
        .with_context(|| format!("Failed to open search index at {}", index_path.display()))?,
    );
    search
        .initialize(feed)
        .await
        .context("Failed to build search index")?;

    let app = router(AppState::new(pages, search.clone(), config.max_menu_depth));

    // Start the server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    search.close();
    tracing::info!("Folio server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
