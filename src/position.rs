//! Gap-based ordering of sibling pages.
//!
//! Siblings are sorted by a floating point `position`. New positions are
//! picked between the neighbours of the requested slot, so moving or creating
//! a page normally rewrites only that page. When repeated inserts at the same
//! spot exhaust the gap, the whole sibling list is renumbered.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::models::PageSummary;
use crate::db::repository::{sort_siblings, PageRepository};
use crate::error::AppError;

/// Spacing between consecutive positions, and the position of a first child.
pub const POSITION_GAP: f64 = 10_000.0;

/// Below this distance to a neighbour the siblings get renumbered.
pub const MIN_POSITION_GAP: f64 = 1e-6;

/// Where to place a page among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetIndex {
    /// Slot `n` of the sibling list, counted without the page being moved.
    At(usize),
    /// After the last sibling.
    Append,
}

impl From<Option<usize>> for TargetIndex {
    fn from(index: Option<usize>) -> Self {
        index.map_or(TargetIndex::Append, TargetIndex::At)
    }
}

/// A new position for one page, plus the siblings that had to be renumbered
/// to make room for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: f64,
    pub rebalanced: Vec<Rebalanced>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rebalanced {
    pub page_id: String,
    pub position: f64,
}

/// Compute the position that puts a page at `target` among `siblings`.
///
/// `siblings` must be sorted by position ascending. `exclude_id` names the
/// page being reordered so it does not count itself.
pub fn compute_position(
    siblings: &[PageSummary],
    target: TargetIndex,
    exclude_id: Option<&str>,
) -> f64 {
    let positions: Vec<f64> = siblings
        .iter()
        .filter(|page| Some(page.id.as_str()) != exclude_id)
        .map(|page| page.position)
        .collect();

    position_between(&positions, target)
}

fn position_between(positions: &[f64], target: TargetIndex) -> f64 {
    let Some(&last) = positions.last() else {
        return POSITION_GAP;
    };

    match target {
        TargetIndex::At(index) if index < positions.len() => {
            if index == 0 {
                positions[0] / 2.0
            } else {
                (positions[index - 1] + positions[index]) / 2.0
            }
        }
        _ => last + POSITION_GAP,
    }
}

/// Like [`compute_position`], but renumbers the siblings when the gap left
/// around the new position is too small to stay distinguishable.
///
/// Only visible siblings (`position >= 0`) take part: `target` counts visible
/// slots, and hidden siblings keep their negative positions.
pub fn plan_placement(
    siblings: &[PageSummary],
    target: TargetIndex,
    exclude_id: Option<&str>,
) -> Placement {
    let visible: Vec<&PageSummary> = siblings
        .iter()
        .filter(|page| Some(page.id.as_str()) != exclude_id && page.position >= 0.0)
        .collect();
    let positions: Vec<f64> = visible.iter().map(|page| page.position).collect();
    let position = position_between(&positions, target);

    let slot = match target {
        TargetIndex::At(index) => index.min(visible.len()),
        TargetIndex::Append => visible.len(),
    };
    let lower = if slot == 0 { 0.0 } else { positions[slot - 1] };
    let upper = positions.get(slot).copied();

    let exhausted = position - lower < MIN_POSITION_GAP
        || upper.is_some_and(|upper| upper - position < MIN_POSITION_GAP);

    if !exhausted {
        return Placement {
            position,
            rebalanced: Vec::new(),
        };
    }

    let spaced = |i: usize| (i + 1) as f64 * POSITION_GAP;
    let rebalanced = visible
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let new_index = if i < slot { i } else { i + 1 };
            (page, spaced(new_index))
        })
        .filter(|(page, position)| page.position != *position)
        .map(|(page, position)| Rebalanced {
            page_id: page.id.clone(),
            position,
        })
        .collect();

    Placement {
        position: spaced(slot),
        rebalanced,
    }
}

/// Per-parent async locks serializing compute-then-write sequences.
#[derive(Default)]
struct ParentLocks {
    locks: DashMap<Option<String>, Arc<Mutex<()>>>,
}

impl ParentLocks {
    async fn lock(&self, parent_id: Option<&str>) -> OwnedMutexGuard<()> {
        // Drop entries nobody holds or waits on.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = self
            .locks
            .entry(parent_id.map(str::to_string))
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// Position computations backed by the page store.
pub struct PositionService {
    repo: Arc<dyn PageRepository>,
    locks: ParentLocks,
    hierarchy: Mutex<()>,
}

impl PositionService {
    pub fn new(repo: Arc<dyn PageRepository>) -> Self {
        Self {
            repo,
            locks: ParentLocks::default(),
            hierarchy: Mutex::new(()),
        }
    }

    /// Position for a page inserted at `target` under `parent_id`.
    pub async fn compute_position(
        &self,
        parent_id: Option<&str>,
        target: TargetIndex,
        exclude_id: Option<&str>,
    ) -> Result<f64, AppError> {
        let siblings = self.siblings(parent_id).await?;
        Ok(compute_position(&siblings, target, exclude_id))
    }

    /// Hold the ordering lock of `parent_id`.
    ///
    /// Create paths take this guard around computing a position and writing
    /// the new page, so concurrent inserts under one parent cannot pick the
    /// same slot.
    pub async fn lock_parent(&self, parent_id: Option<&str>) -> OwnedMutexGuard<()> {
        self.locks.lock(parent_id).await
    }

    /// Move `page_id` under `new_parent_id` at `target` and persist the result.
    ///
    /// Rejects moving a page under itself or one of its descendants. Moves
    /// run one at a time, so two crossing moves cannot build a cycle.
    pub async fn move_page(
        &self,
        page_id: &str,
        new_parent_id: Option<&str>,
        target: TargetIndex,
    ) -> Result<Placement, AppError> {
        let _hierarchy = self.hierarchy.lock().await;
        if self.repo.get_page_by_id(page_id).await?.is_none() {
            return Err(AppError::NotFound(format!("page '{page_id}'")));
        }
        self.ensure_not_descendant(page_id, new_parent_id).await?;

        let _guard = self.lock_parent(new_parent_id).await;
        let siblings = self.siblings(new_parent_id).await?;
        let placement = plan_placement(&siblings, target, Some(page_id));

        if !placement.rebalanced.is_empty() {
            tracing::info!(
                parent_id = ?new_parent_id,
                siblings = placement.rebalanced.len(),
                "Renumbering sibling positions"
            );
        }
        for sibling in &placement.rebalanced {
            self.repo
                .update_page_position(&sibling.page_id, new_parent_id, sibling.position)
                .await?;
        }
        self.repo
            .update_page_position(page_id, new_parent_id, placement.position)
            .await?;

        tracing::debug!(page_id, position = placement.position, "Page moved");
        Ok(placement)
    }

    async fn siblings(&self, parent_id: Option<&str>) -> Result<Vec<PageSummary>, AppError> {
        let mut siblings = self.repo.find_pages_by_parent(parent_id).await?;
        sort_siblings(&mut siblings);
        Ok(siblings)
    }

    async fn ensure_not_descendant(
        &self,
        page_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), AppError> {
        let mut current = new_parent_id.map(str::to_string);
        let mut hops = 0usize;

        while let Some(ancestor_id) = current {
            if ancestor_id == page_id {
                return Err(AppError::BadRequest(
                    "cannot move a page under itself or one of its descendants".into(),
                ));
            }
            hops += 1;
            if hops > 10_000 {
                return Err(AppError::Internal("page hierarchy contains a cycle".into()));
            }
            current = match self.repo.get_page_by_id(&ancestor_id).await? {
                Some(ancestor) => ancestor.parent_id,
                None => {
                    return Err(AppError::NotFound(format!("parent page '{ancestor_id}'")))
                }
            };
        }

        Ok(())
    }
}
