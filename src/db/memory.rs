use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::db::change_stream::{ChangeFeed, ChangeStream};
use crate::db::models::{ChangeEvent, Page, PageSummary};
use crate::db::repository::{sort_siblings, PageRepository};
use crate::error::AppError;

type Subscriber = mpsc::UnboundedSender<Result<ChangeEvent, AppError>>;

/// In-process page store with a live change feed.
///
/// Writes made through [`insert_page`](Self::insert_page) and
/// [`delete_page`](Self::delete_page) are published to every open
/// subscription, which makes it a drop-in stand-in for MongoDB in tests
/// and single-process embeddings.
#[derive(Default)]
pub struct MemoryPageRepository {
    pages: Mutex<BTreeMap<String, Page>>,
    subscribers: Mutex<Vec<Subscriber>>,
    failing_subscriptions: AtomicUsize,
    subscriptions: AtomicUsize,
}

impl MemoryPageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without emitting change events.
    pub fn with_pages(pages: impl IntoIterator<Item = Page>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.pages.lock().unwrap_or_else(|e| e.into_inner());
            for page in pages {
                map.insert(page.id.clone(), page);
            }
        }
        repo
    }

    /// Insert or replace a page and publish an `Upserted` event.
    pub fn insert_page(&self, page: Page) {
        self.lock_pages().insert(page.id.clone(), page.clone());
        self.publish(ChangeEvent::Upserted(page));
    }

    /// Delete a page and publish a `Deleted` event.
    pub fn delete_page(&self, id: &str) -> Option<Page> {
        let removed = self.lock_pages().remove(id);
        if removed.is_some() {
            self.publish(ChangeEvent::Deleted(id.to_string()));
        }
        removed
    }

    /// Make the next `n` calls to `subscribe` fail.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.failing_subscriptions.store(n, Ordering::SeqCst);
    }

    /// Break every open subscription with a transport error.
    pub fn disconnect_subscribers(&self) {
        let subscribers = std::mem::take(&mut *self.lock_subscribers());
        for subscriber in subscribers {
            let _ = subscriber.send(Err(AppError::Database("connection reset".into())));
        }
    }

    /// Number of successful `subscribe` calls so far.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn publish(&self, event: ChangeEvent) {
        self.lock_subscribers()
            .retain(|subscriber| subscriber.send(Ok(event.clone())).is_ok());
    }

    fn lock_pages(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Page>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PageRepository for MemoryPageRepository {
    async fn find_pages_by_parent(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<PageSummary>, AppError> {
        let mut siblings: Vec<PageSummary> = self
            .lock_pages()
            .values()
            .filter(|page| page.parent_id.as_deref() == parent_id)
            .map(PageSummary::from)
            .collect();
        sort_siblings(&mut siblings);
        Ok(siblings)
    }

    async fn get_page_by_id(&self, id: &str) -> Result<Option<Page>, AppError> {
        Ok(self.lock_pages().get(id).cloned())
    }

    async fn find_all_pages(&self, limit: usize) -> Result<Vec<Page>, AppError> {
        Ok(self.lock_pages().values().take(limit).cloned().collect())
    }

    async fn count_pages(&self) -> Result<u64, AppError> {
        Ok(self.lock_pages().len() as u64)
    }

    async fn update_page_position(
        &self,
        id: &str,
        parent_id: Option<&str>,
        position: f64,
    ) -> Result<(), AppError> {
        let updated = {
            let mut pages = self.lock_pages();
            let page = pages
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("page '{id}'")))?;
            page.parent_id = parent_id.map(str::to_string);
            page.position = position;
            page.updated_at = chrono::Utc::now();
            page.clone()
        };
        self.publish(ChangeEvent::Upserted(updated));
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryPageRepository {
    async fn subscribe(&self) -> Result<ChangeStream, AppError> {
        let failing = self.failing_subscriptions.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_subscriptions.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::Database("change feed unavailable".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_subscribers().push(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
