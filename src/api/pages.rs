use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::db::models::NavItem;
use crate::error::AppError;
use crate::nav::MenuTreeBuilder;
use crate::position::{Placement, PositionService, TargetIndex};

/// Query strings send `parent=` for the top level.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
pub struct NavQuery {
    pub parent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub parent: Option<String>,
    pub index: Option<usize>,
    pub exclude: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PositionResponse {
    pub position: f64,
}

#[derive(Debug, Deserialize)]
pub struct MovePageRequest {
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Slot among the new siblings; appended when absent.
    #[serde(default)]
    pub index: Option<usize>,
}

pub async fn process_nav(
    menu: &MenuTreeBuilder,
    parent: Option<String>,
) -> Result<Vec<NavItem>, AppError> {
    menu.build_tree(non_empty(parent).as_deref()).await
}

pub async fn process_position(
    positions: &PositionService,
    query: PositionQuery,
) -> Result<PositionResponse, AppError> {
    let parent = non_empty(query.parent);
    let exclude = non_empty(query.exclude);
    let position = positions
        .compute_position(parent.as_deref(), query.index.into(), exclude.as_deref())
        .await?;
    Ok(PositionResponse { position })
}

pub async fn process_move(
    positions: &PositionService,
    page_id: &str,
    request: MovePageRequest,
) -> Result<Placement, AppError> {
    if page_id.trim().is_empty() {
        return Err(AppError::BadRequest("Page id cannot be empty".into()));
    }
    let parent = non_empty(request.parent_id);
    let target = TargetIndex::from(request.index);
    positions.move_page(page_id, parent.as_deref(), target).await
}

pub async fn nav_handler(
    State(state): State<AppState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<Vec<NavItem>>, AppError> {
    process_nav(&state.menu, query.parent).await.map(Json)
}

pub async fn position_handler(
    State(state): State<AppState>,
    Query(query): Query<PositionQuery>,
) -> Result<Json<PositionResponse>, AppError> {
    process_position(&state.positions, query).await.map(Json)
}

pub async fn move_page_handler(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
    Json(request): Json<MovePageRequest>,
) -> Result<Json<Placement>, AppError> {
    process_move(&state.positions, &page_id, request).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryPageRepository;
    use crate::db::models::Page;
    use crate::db::repository::PageRepository;
    use chrono::Utc;
    use std::sync::Arc;

    fn page(id: &str, parent_id: Option<&str>, position: f64) -> Page {
        Page {
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            title: id.to_string(),
            slug: id.to_string(),
            slugs: vec![],
            content: String::new(),
            position,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_non_empty_parent() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some(String::new())), None);
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("p".into())), Some("p".to_string()));
    }

    #[tokio::test]
    async fn test_process_position_treats_empty_parent_as_top_level() {
        let repo = Arc::new(MemoryPageRepository::with_pages([
            page("a", None, 10_000.0),
            page("b", None, 20_000.0),
        ]));
        let positions = PositionService::new(repo);

        let response = process_position(
            &positions,
            PositionQuery { parent: Some(String::new()), index: Some(1), exclude: None },
        )
        .await
        .unwrap();
        assert_eq!(response.position, 15_000.0);
    }

    #[tokio::test]
    async fn test_process_move_appends_without_index() {
        let repo = Arc::new(MemoryPageRepository::with_pages([
            page("a", None, 10_000.0),
            page("b", None, 20_000.0),
        ]));
        let positions = PositionService::new(repo.clone());

        let placement = process_move(
            &positions,
            "a",
            MovePageRequest { parent_id: None, index: None },
        )
        .await
        .unwrap();
        assert_eq!(placement.position, 30_000.0);
        let moved = repo.get_page_by_id("a").await.unwrap().unwrap();
        assert_eq!(moved.position, 30_000.0);
    }

    #[tokio::test]
    async fn test_process_move_unknown_page() {
        let positions = PositionService::new(Arc::new(MemoryPageRepository::new()));
        let err = process_move(&positions, "ghost", MovePageRequest { parent_id: None, index: None })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
