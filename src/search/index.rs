use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, RunMode};
use crate::db::change_stream::ChangeFeed;
use crate::db::models::{ChangeEvent, Page};
use crate::db::repository::PageRepository;
use crate::error::AppError;
use crate::search::normalize::{
    compress_text_for_search, highlight_phrase, prepare_fts_query, render_snippet, MATCH_END,
    MATCH_START,
};

/// Most hits returned by [`SearchIndex::search`].
pub const SEARCH_LIMIT: usize = 50;
/// Most hits returned by [`SearchIndex::search_by_title`].
pub const TITLE_SEARCH_LIMIT: usize = 25;
/// Tokens in a content snippet (the FTS5 maximum).
const SNIPPET_TOKENS: i64 = 64;

/// A ranked full-text hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub page_id: String,
    pub page_slug: String,
    /// Escaped title with `<mark>` around matched words.
    pub title: String,
    /// Escaped excerpt around the first match with `<mark>` around matches.
    pub snippet: String,
}

/// A title-only hit, used for autocomplete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTitleMatch {
    pub page_id: String,
    pub page_title: String,
}

/// Lifecycle of a [`SearchIndex`]. Operations wait for `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Uninitialized,
    Building,
    Ready,
}

/// Tuning knobs of a [`SearchIndex`].
#[derive(Debug, Clone)]
pub struct SearchIndexOptions {
    pub run_mode: RunMode,
    pub max_indexable_documents: usize,
    pub reconnect_delay: Duration,
    pub force_rebuild: bool,
}

impl SearchIndexOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            run_mode: config.run_mode,
            max_indexable_documents: config.max_indexable_documents,
            reconnect_delay: config.reconnect_delay(),
            force_rebuild: config.force_rebuild(),
        }
    }
}

impl Default for SearchIndexOptions {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Development,
            max_indexable_documents: 50_000,
            reconnect_delay: Duration::from_secs(5),
            force_rebuild: false,
        }
    }
}

/// The searchable form of a page.
struct IndexEntry {
    id: String,
    title_indexed: String,
    content_indexed: String,
    slug: String,
    title_full: String,
}

impl From<&Page> for IndexEntry {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id.clone(),
            title_indexed: compress_text_for_search(&page.title),
            content_indexed: compress_text_for_search(&page.content),
            slug: page.slug.clone(),
            title_full: page.title.clone(),
        }
    }
}

struct Hit {
    id: String,
    slug: String,
    /// Indexed title with match markers, as the tokenizer matched it.
    marked_title: String,
    snippet: String,
}

impl Hit {
    /// Highlighted title for `live_title`. The index marks stemmed matches;
    /// when the live title moved on since indexing, fall back to prefix
    /// matching on the live text.
    fn title_html(&self, query: &str, live_title: &str) -> String {
        let live = compress_text_for_search(live_title);
        let indexed = self
            .marked_title
            .replace(MATCH_START, "")
            .replace(MATCH_END, "");
        if indexed == live {
            render_snippet(&self.marked_title)
        } else {
            highlight_phrase(query, &live)
        }
    }
}

const INSERT_ENTRY: &str =
    "INSERT INTO pages_fts(id, title, content, slug, title_full) VALUES (?1, ?2, ?3, ?4, ?5)";
const DELETE_ENTRY: &str = "DELETE FROM pages_fts WHERE id = ?1";

fn insert_entry(conn: &Connection, entry: &IndexEntry) -> rusqlite::Result<()> {
    conn.prepare_cached(INSERT_ENTRY)?.execute(params![
        entry.id,
        entry.title_indexed,
        entry.content_indexed,
        entry.slug,
        entry.title_full,
    ])?;
    Ok(())
}

/// Embedded full-text index over all pages, backed by SQLite FTS5.
///
/// The index mirrors the page store: it is rebuilt at startup when the row
/// counts disagree and then follows the store's change feed. Every public
/// operation waits until the first build finished.
pub struct SearchIndex {
    conn: Mutex<Option<Connection>>,
    pages: Arc<dyn PageRepository>,
    options: SearchIndexOptions,
    state: watch::Sender<IndexState>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SearchIndex {
    /// Open (or create) the index file at `path`.
    pub fn open(
        path: &Path,
        pages: Arc<dyn PageRepository>,
        options: SearchIndexOptions,
    ) -> Result<Self, AppError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                AppError::Index(format!("cannot create index directory {}: {e}", dir.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn, pages, options)
    }

    /// An index that lives only as long as the process.
    pub fn open_in_memory(
        pages: Arc<dyn PageRepository>,
        options: SearchIndexOptions,
    ) -> Result<Self, AppError> {
        Self::with_connection(Connection::open_in_memory()?, pages, options)
    }

    fn with_connection(
        conn: Connection,
        pages: Arc<dyn PageRepository>,
        options: SearchIndexOptions,
    ) -> Result<Self, AppError> {
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
                id UNINDEXED,
                title,
                content,
                slug UNINDEXED,
                title_full UNINDEXED,
                tokenize='porter unicode61 remove_diacritics 2'
            );
            "#,
        )?;

        let (state, _) = watch::channel(IndexState::Uninitialized);
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            pages,
            options,
            state,
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
        })
    }

    pub fn state(&self) -> IndexState {
        *self.state.borrow()
    }

    /// Bring the index to `Ready` and start following the change feed.
    ///
    /// In test mode nothing is built and no feed is opened; the index is
    /// simply declared ready.
    pub async fn initialize(
        self: &Arc<Self>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<(), AppError> {
        if self.options.run_mode == RunMode::Test {
            self.state.send_replace(IndexState::Ready);
            return Ok(());
        }

        self.build_index(self.options.force_rebuild).await?;
        self.start_change_listener(feed);
        Ok(())
    }

    /// Rebuild the index from the page store.
    ///
    /// Unless `force` is set, the rebuild is skipped when the store and the
    /// index hold the same number of documents. The rebuild runs in one
    /// transaction, so readers see either the old or the new index.
    /// Returns the number of indexed documents.
    pub async fn build_index(&self, force: bool) -> Result<usize, AppError> {
        self.state.send_if_modified(|state| {
            let starting = *state == IndexState::Uninitialized;
            if starting {
                *state = IndexState::Building;
            }
            starting
        });

        if !force {
            let live = match self.pages.count_pages().await {
                Ok(live) => Some(live),
                Err(e) => {
                    tracing::warn!("Failed to count pages, forcing a rebuild: {e}");
                    None
                }
            };
            let indexed = self.indexed_count()?;
            if live == Some(indexed) {
                tracing::info!(documents = indexed, "Search index is up to date");
                self.state.send_replace(IndexState::Ready);
                return Ok(indexed as usize);
            }
        }

        let pages = self
            .pages
            .find_all_pages(self.options.max_indexable_documents)
            .await
            .map_err(|e| AppError::Index(format!("failed to load pages for rebuild: {e}")))?;
        let entries: Vec<IndexEntry> = pages.iter().map(IndexEntry::from).collect();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pages_fts", [])?;
            for entry in &entries {
                insert_entry(&tx, entry)?;
            }
            tx.commit()
        })
        .map_err(|e| {
            tracing::error!("Failed to build search index: {e}");
            e
        })?;

        tracing::info!(documents = entries.len(), "Search index built");
        self.state.send_replace(IndexState::Ready);
        Ok(entries.len())
    }

    /// Number of rows in the index.
    pub fn indexed_count(&self) -> Result<u64, AppError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM pages_fts", [], |row| row.get::<_, i64>(0))
                .map(|count| count as u64)
        })
    }

    /// Index `page`, replacing any previous entry with the same id.
    pub async fn upsert(&self, page: &Page) -> Result<(), AppError> {
        self.wait_ready().await;
        let entry = IndexEntry::from(page);

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.prepare_cached(DELETE_ENTRY)?.execute(params![entry.id])?;
            insert_entry(&tx, &entry)?;
            tx.commit()
        })
    }

    /// Drop the entry of `id`. Unknown ids are ignored.
    pub async fn remove(&self, id: &str) -> Result<(), AppError> {
        self.wait_ready().await;
        self.with_conn(|conn| {
            conn.prepare_cached(DELETE_ENTRY)?.execute(params![id])?;
            Ok(())
        })
    }

    /// Ranked full-text search over titles and contents.
    ///
    /// Title matches weigh twice as much as content matches. Hits whose page
    /// no longer exists are skipped. Failures are logged and yield no results.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        self.wait_ready().await;

        let fts_query = prepare_fts_query(query);
        if fts_query.is_empty() {
            return Vec::new();
        }

        let hits = match self.query_hits(&fts_query) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!("Search error: {e}");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let page = match self.pages.get_page_by_id(&hit.id).await {
                Ok(Some(page)) => page,
                Ok(None) => {
                    tracing::debug!(page_id = %hit.id, "Skipping hit for missing page");
                    continue;
                }
                Err(e) => {
                    tracing::error!("Search error while loading page '{}': {e}", hit.id);
                    return Vec::new();
                }
            };

            results.push(SearchResult {
                title: hit.title_html(query, &page.title),
                snippet: render_snippet(&hit.snippet),
                page_id: hit.id,
                page_slug: hit.slug,
            });
        }

        results
    }

    /// Title-only search for autocomplete. Does not touch the page store.
    pub async fn search_by_title(&self, query: &str) -> Vec<PageTitleMatch> {
        self.wait_ready().await;

        let fts_query = prepare_fts_query(query);
        if fts_query.is_empty() {
            return Vec::new();
        }

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT id, title_full
                FROM pages_fts
                WHERE title MATCH ?1
                ORDER BY bm25(pages_fts, 0.0, 10.0, 0.0, 0.0, 0.0), id
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![fts_query, TITLE_SEARCH_LIMIT as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        });

        match rows {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|(page_id, title)| {
                    title.map(|page_title| PageTitleMatch { page_id, page_title })
                })
                .collect(),
            Err(e) => {
                tracing::error!("Title search error: {e}");
                Vec::new()
            }
        }
    }

    /// Start the background task that mirrors store changes into the index.
    ///
    /// Transport failures are logged and the feed is re-opened after the
    /// configured delay. Calling this again replaces the running listener.
    pub fn start_change_listener(self: &Arc<Self>, feed: Arc<dyn ChangeFeed>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let handle = tokio::spawn(Arc::clone(self).follow_changes(feed));
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop the change listener and release the index file. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Some(listener) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take() {
            listener.abort();
        }
        if self.conn.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            tracing::info!("Search index closed");
        }
    }

    async fn follow_changes(self: Arc<Self>, feed: Arc<dyn ChangeFeed>) {
        loop {
            let subscription = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                subscription = feed.subscribe() => subscription,
            };

            match subscription {
                Ok(mut stream) => {
                    tracing::info!("Following page changes");
                    loop {
                        let next = tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(event)) => self.apply_change(event).await,
                            Some(Err(e)) => {
                                tracing::error!("Error in changes feed: {e}");
                                break;
                            }
                            None => {
                                tracing::warn!("Changes feed ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Failed to subscribe to changes feed: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }
    }

    async fn apply_change(&self, event: ChangeEvent) {
        let page_id = event.page_id().to_string();
        let applied = match event {
            ChangeEvent::Upserted(page) => self.upsert(&page).await,
            ChangeEvent::Deleted(id) => self.remove(&id).await,
        };
        if let Err(e) = applied {
            tracing::error!(page_id = %page_id, "Failed to apply page change to search index: {e}");
        }
    }

    async fn wait_ready(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this only returns once ready.
        let _ = state.wait_for(|state| *state == IndexState::Ready).await;
    }

    fn query_hits(&self, fts_query: &str) -> Result<Vec<Hit>, AppError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT id, slug, highlight(pages_fts, 1, ?2, ?3),
                       snippet(pages_fts, -1, ?2, ?3, '…', ?4)
                FROM pages_fts
                WHERE pages_fts MATCH ?1
                ORDER BY bm25(pages_fts, 0.0, 10.0, 5.0, 0.0, 0.0), id
                LIMIT ?5
                "#,
            )?;
            let rows = stmt.query_map(
                params![fts_query, MATCH_START, MATCH_END, SNIPPET_TOKENS, SEARCH_LIMIT as i64],
                |row| {
                    Ok(Hit {
                        id: row.get(0)?,
                        slug: row.get(1)?,
                        marked_title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        snippet: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    })
                },
            )?;
            rows.collect()
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, AppError> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let conn = guard
            .as_mut()
            .ok_or_else(|| AppError::Index("search index is closed".into()))?;
        f(conn).map_err(AppError::from)
    }
}
