use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::search::index::{PageTitleMatch, SearchResult};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Ranked full-text search. Failures surface as an empty list.
pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Json<Vec<SearchResult>> {
    Json(state.search.search(&params.q).await)
}

/// Title-only search for the autocomplete box.
pub async fn title_search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Json<Vec<PageTitleMatch>> {
    Json(state.search.search_by_title(&params.q).await)
}
