use async_trait::async_trait;

use crate::db::models::{Page, PageSummary};
use crate::error::AppError;

/// Repository trait for page queries.
///
/// Page CRUD belongs to the surrounding application; this trait only covers
/// what ordering, navigation and search indexing read, plus the position
/// write used by moves.
#[async_trait]
pub trait PageRepository: Send + Sync {
    /// Direct children of `parent_id` (`None` for top level), sorted by
    /// position ascending with the id as tiebreaker.
    async fn find_pages_by_parent(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<PageSummary>, AppError>;

    /// Find a page by id. Returns `None` when it no longer exists.
    async fn get_page_by_id(&self, id: &str) -> Result<Option<Page>, AppError>;

    /// Load up to `limit` pages, used by full index rebuilds.
    async fn find_all_pages(&self, limit: usize) -> Result<Vec<Page>, AppError>;

    /// Number of live pages.
    async fn count_pages(&self) -> Result<u64, AppError>;

    /// Set a page's parent and position in one write.
    async fn update_page_position(
        &self,
        id: &str,
        parent_id: Option<&str>,
        position: f64,
    ) -> Result<(), AppError>;
}

/// Sort siblings the way the store returns them.
pub(crate) fn sort_siblings(pages: &mut [PageSummary]) {
    pages.sort_by(|a, b| {
        a.position
            .total_cmp(&b.position)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// MongoDB implementation of the PageRepository.
#[cfg(feature = "mongo")]
pub struct MongoPageRepository {
    collection: mongodb::Collection<Page>,
}

#[cfg(feature = "mongo")]
impl MongoPageRepository {
    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            collection: db.collection("pages"),
        }
    }

    pub fn collection(&self) -> &mongodb::Collection<Page> {
        &self.collection
    }

    /// Create the `(parent_id, position)` index sibling queries rely on.
    pub async fn ensure_indexes(&self) -> Result<(), AppError> {
        use mongodb::bson::doc;
        use mongodb::IndexModel;

        let index = IndexModel::builder()
            .keys(doc! { "parent_id": 1, "position": 1 })
            .build();

        self.collection
            .create_index(index)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(feature = "mongo")]
#[async_trait]
impl PageRepository for MongoPageRepository {
    async fn find_pages_by_parent(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<PageSummary>, AppError> {
        use futures::TryStreamExt;
        use mongodb::bson::doc;
        use mongodb::options::FindOptions;

        // A null filter also matches documents without the field.
        let filter = doc! { "parent_id": parent_id };
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1, "parent_id": 1, "title": 1, "slug": 1, "position": 1 })
            .sort(doc! { "position": 1, "_id": 1 })
            .build();

        let cursor = self
            .collection
            .clone_with_type::<PageSummary>()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn get_page_by_id(&self, id: &str) -> Result<Option<Page>, AppError> {
        use mongodb::bson::doc;

        self.collection
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn find_all_pages(&self, limit: usize) -> Result<Vec<Page>, AppError> {
        use futures::TryStreamExt;
        use mongodb::bson::doc;
        use mongodb::options::FindOptions;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let options = FindOptions::builder().limit(limit).build();

        let cursor = self
            .collection
            .find(doc! {})
            .with_options(options)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn count_pages(&self) -> Result<u64, AppError> {
        use mongodb::bson::doc;

        self.collection
            .count_documents(doc! {})
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn update_page_position(
        &self,
        id: &str,
        parent_id: Option<&str>,
        position: f64,
    ) -> Result<(), AppError> {
        use mongodb::bson::doc;

        let result = self
            .collection
            .update_one(
                doc! { "_id": id },
                doc! { "$set": {
                    "parent_id": parent_id,
                    "position": position,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                } },
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.matched_count == 0 {
            return Err(AppError::NotFound(format!("page '{id}'")));
        }

        Ok(())
    }
}
