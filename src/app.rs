use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::db::repository::PageRepository;
use crate::nav::MenuTreeBuilder;
use crate::position::PositionService;
use crate::search::index::SearchIndex;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchIndex>,
    pub menu: Arc<MenuTreeBuilder>,
    pub positions: Arc<PositionService>,
}

impl AppState {
    pub fn new(
        pages: Arc<dyn PageRepository>,
        search: Arc<SearchIndex>,
        max_menu_depth: usize,
    ) -> Self {
        Self {
            menu: Arc::new(MenuTreeBuilder::new(pages.clone(), max_menu_depth)),
            positions: Arc::new(PositionService::new(pages)),
            search,
        }
    }
}

/// The JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/search", get(api::search::search_handler))
        .route(
            "/api/v1/search/titles",
            get(api::search::title_search_handler),
        )
        .route("/api/v1/nav", get(api::pages::nav_handler))
        .route(
            "/api/v1/pages/position",
            get(api::pages::position_handler),
        )
        .route(
            "/api/v1/pages/{id}/move",
            post(api::pages::move_page_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
