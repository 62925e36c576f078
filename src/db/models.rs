use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A wiki page stored in the `pages` collection.
///
/// The store owns this record; the core only reads it and recommends
/// values for `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Stable identifier (the MongoDB `_id`).
    #[serde(rename = "_id")]
    pub id: String,
    /// Parent page, `None` for top-level pages.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Human-readable title.
    pub title: String,
    /// Current URL slug.
    pub slug: String,
    /// Slugs the page was reachable under before a rename.
    #[serde(default)]
    pub slugs: Vec<String>,
    /// Page body, usually sanitized HTML.
    #[serde(default)]
    pub content: String,
    /// Sort key among siblings sharing the same `parent_id`.
    pub position: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The projection of a page needed to order siblings and render navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub title: String,
    pub slug: String,
    pub position: f64,
}

impl From<&Page> for PageSummary {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id.clone(),
            parent_id: page.parent_id.clone(),
            title: page.title.clone(),
            slug: page.slug.clone(),
            position: page.position,
        }
    }
}

/// A notification from the store's change stream.
///
/// Inserts and updates are indistinguishable downstream, both carry the
/// full current page.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Upserted(Page),
    Deleted(String),
}

impl ChangeEvent {
    pub fn page_id(&self) -> &str {
        match self {
            ChangeEvent::Upserted(page) => &page.id,
            ChangeEvent::Deleted(id) => id,
        }
    }
}

/// A node of the navigation tree, rebuilt per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavItem {
    pub page_id: String,
    pub title: String,
    pub link: String,
    pub position: f64,
    pub children: Vec<NavItem>,
}
