use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use folio::config::AppConfig;
use folio::db::repository::{MongoPageRepository, PageRepository};
use folio::search::index::{SearchIndex, SearchIndexOptions};

/// Rebuild the full-text index from the page store.
#[derive(Debug, Parser)]
#[command(name = "folio-reindex", version)]
struct Cli {
    /// Rebuild even when the index already holds as many documents as the store.
    #[arg(long)]
    force: bool,

    /// Index directory, overriding the configured one.
    #[arg(long)]
    index_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if let Some(index_dir) = cli.index_dir {
        config.index_dir = index_dir;
    }

    let mongo_client = mongodb::Client::with_uri_str(&config.mongodb_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let pages: Arc<dyn PageRepository> = Arc::new(MongoPageRepository::new(
        &mongo_client.database(&config.mongodb_database),
    ));
    tracing::info!("Connected to MongoDB at {}", config.redacted_mongodb_uri());

    let index_path = config.index_path();
    let index = SearchIndex::open(&index_path, pages, SearchIndexOptions::from_config(&config))
        .with_context(|| format!("Failed to open search index at {}", index_path.display()))?;

    let documents = index
        .build_index(cli.force)
        .await
        .context("Failed to rebuild search index")?;
    index.close();

    println!("Indexed {documents} documents into {}", index_path.display());
    Ok(())
}
