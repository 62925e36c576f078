#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;

use folio::app::{router, AppState};
use folio::config::RunMode;
use folio::db::models::Page;
use folio::db::memory::MemoryPageRepository;
use folio::search::index::{SearchIndex, SearchIndexOptions};

/// An in-process store, an in-memory index built from it, and the API router.
pub struct TestEnv {
    pub repo: Arc<MemoryPageRepository>,
    pub search: Arc<SearchIndex>,
    pub router: Router,
}

impl TestEnv {
    /// Seed the store with `pages` and build the index from it.
    pub async fn start(pages: impl IntoIterator<Item = Page>) -> Self {
        let repo = Arc::new(MemoryPageRepository::with_pages(pages));
        let options = SearchIndexOptions {
            run_mode: RunMode::Test,
            reconnect_delay: Duration::from_millis(50),
            ..SearchIndexOptions::default()
        };
        let search = Arc::new(
            SearchIndex::open_in_memory(repo.clone(), options)
                .expect("Failed to open in-memory index"),
        );
        search
            .initialize(repo.clone())
            .await
            .expect("Failed to initialize index");
        search
            .build_index(true)
            .await
            .expect("Failed to build index");

        let router = router(AppState::new(repo.clone(), search.clone(), 32));

        Self {
            repo,
            search,
            router,
        }
    }

    /// Start mirroring store changes into the index and wait until the
    /// listener is subscribed.
    pub async fn follow_changes(&self) {
        let before = self.repo.subscription_count();
        self.search.start_change_listener(self.repo.clone());
        let repo = self.repo.clone();
        eventually(|| {
            let repo = repo.clone();
            async move { repo.subscription_count() > before }
        })
        .await;
    }

    /// Build an `axum_test::TestServer` from this environment's router.
    pub fn server(&self) -> axum_test::TestServer {
        axum_test::TestServer::builder()
            .expect_success_by_default()
            .build(self.router.clone())
    }

    /// Build a `TestServer` that does NOT expect success by default (for error tests).
    pub fn server_permissive(&self) -> axum_test::TestServer {
        axum_test::TestServer::builder()
            .build(self.router.clone())
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.search.close();
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

pub fn page(id: &str, parent_id: Option<&str>, title: &str, content: &str, position: f64) -> Page {
    Page {
        id: id.to_string(),
        parent_id: parent_id.map(str::to_string),
        title: title.to_string(),
        slug: id.to_string(),
        slugs: vec![id.to_string()],
        content: content.to_string(),
        position,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
