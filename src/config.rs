use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// File name of the full-text index inside `index_dir`.
pub const INDEX_FILE_NAME: &str = "fts_index.db";

/// Where the process runs. `Test` skips the boot-time index build and the
/// change-stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Development,
    Production,
    Test,
}

/// Application configuration.
///
/// Loaded from built-in defaults, then an optional `folio.toml` in the working
/// directory, then `FOLIO_*` environment variables (e.g. `FOLIO_MONGODB_URI`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mongodb_uri: String,
    pub mongodb_database: String,
    /// Directory holding the search index file.
    pub index_dir: PathBuf,
    pub run_mode: RunMode,
    pub bind_addr: String,
    /// Upper bound of pages loaded by a full index rebuild.
    pub max_indexable_documents: usize,
    /// Delay before re-subscribing to the change stream after a failure.
    pub reconnect_delay_secs: u64,
    /// Deepest navigation level rendered by the menu builder.
    pub max_menu_depth: usize,
    /// Rebuild the index at boot even when the row counts match.
    /// Defaults to `true` in production.
    #[serde(default)]
    pub force_rebuild: Option<bool>,
}

impl AppConfig {
    /// Load the configuration from defaults, `folio.toml` and the environment.
    pub fn load() -> Result<Self, AppError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name("folio").required(false))
                .add_source(config::Environment::with_prefix("FOLIO").try_parsing(true)),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, AppError> {
        let settings = builder
            .set_default("mongodb_uri", "mongodb://localhost:27017")?
            .set_default("mongodb_database", "folio")?
            .set_default("index_dir", ".")?
            .set_default("run_mode", "development")?
            .set_default("bind_addr", "127.0.0.1:3000")?
            .set_default("max_indexable_documents", 50_000_i64)?
            .set_default("reconnect_delay_secs", 5_i64)?
            .set_default("max_menu_depth", 32_i64)?
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        if config.max_menu_depth == 0 {
            return Err(AppError::Config("max_menu_depth must be at least 1".into()));
        }
        Ok(config)
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE_NAME)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn force_rebuild(&self) -> bool {
        self.force_rebuild
            .unwrap_or(self.run_mode == RunMode::Production)
    }

    /// The MongoDB URI with any password replaced, safe for logs.
    pub fn redacted_mongodb_uri(&self) -> String {
        match url::Url::parse(&self.mongodb_uri) {
            Ok(mut parsed) if parsed.password().is_some() => {
                let _ = parsed.set_password(Some("***"));
                parsed.to_string()
            }
            Ok(parsed) => parsed.to_string(),
            Err(_) => "<invalid uri>".to_string(),
        }
    }
}
