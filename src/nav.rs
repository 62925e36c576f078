use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;

use crate::db::models::{NavItem, PageSummary};
use crate::db::repository::{sort_siblings, PageRepository};
use crate::error::AppError;

/// Public link of a page slug. The empty slug and `/` map to the site root.
pub fn slug_url(slug: &str) -> String {
    if slug.is_empty() || slug == "/" {
        "/".to_string()
    } else {
        format!("/page/{slug}")
    }
}

/// Builds the navigation tree from the parent pointers in the store.
pub struct MenuTreeBuilder {
    repo: Arc<dyn PageRepository>,
    max_depth: usize,
}

impl MenuTreeBuilder {
    pub fn new(repo: Arc<dyn PageRepository>, max_depth: usize) -> Self {
        Self { repo, max_depth }
    }

    /// The navigation forest below `parent_id` (`None` for the whole site).
    ///
    /// Every level is sorted by position ascending. Pages with a negative
    /// position are left out. Levels deeper than `max_depth` are cut off.
    pub async fn build_tree(&self, parent_id: Option<&str>) -> Result<Vec<NavItem>, AppError> {
        self.build_level(parent_id.map(str::to_string), 1).await
    }

    fn build_level(
        &self,
        parent_id: Option<String>,
        depth: usize,
    ) -> BoxFuture<'_, Result<Vec<NavItem>, AppError>> {
        async move {
            if depth > self.max_depth {
                tracing::warn!(
                    parent_id = ?parent_id,
                    max_depth = self.max_depth,
                    "Navigation tree truncated"
                );
                return Ok(Vec::new());
            }

            let mut pages = self.repo.find_pages_by_parent(parent_id.as_deref()).await?;
            pages.retain(|page| page.position >= 0.0);
            sort_siblings(&mut pages);

            try_join_all(pages.into_iter().map(|page| self.build_item(page, depth))).await
        }
        .boxed()
    }

    async fn build_item(&self, page: PageSummary, depth: usize) -> Result<NavItem, AppError> {
        let children = self.build_level(Some(page.id.clone()), depth + 1).await?;
        Ok(NavItem {
            link: slug_url(&page.slug),
            page_id: page.id,
            title: page.title,
            position: page.position,
            children,
        })
    }
}
