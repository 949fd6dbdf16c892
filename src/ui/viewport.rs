//! Viewport-driven thumbnail requests
//!
//! Turns "the grid scrolled or changed shape" into a prioritised, rate
//! limited series of thumbnail requests. Knows nothing about decoding or
//! storage beyond the [`ThumbnailService`] interface.
use std::collections::{HashSet, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use crate::art::{
    ArtSource, CacheKey, CellState, Priority, RequestOutcome, ThumbnailEvent, ThumbnailService,
};

/// Default number of requests handed to the loader per timer tick
pub const DEFAULT_REQUESTS_PER_TICK: usize = 5;

/// Grid shape and scroll position, in logical pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub columns: usize,
    /// Square thumbnail edge
    pub cell_size: f32,
    /// Height of one row including caption and spacing
    pub row_height: f32,
    pub scroll_y: f32,
    pub viewport_height: f32,
}

impl GridGeometry {
    /// Fit as many `cell_size` columns (plus `spacing`) as the width allows
    pub fn fit(
        viewport_width: f32,
        viewport_height: f32,
        scroll_y: f32,
        cell_size: f32,
        row_height: f32,
        spacing: f32,
    ) -> Self {
        let pitch = (cell_size + spacing).max(1.0);
        let columns = (((viewport_width + spacing) / pitch).floor() as usize).max(1);
        Self {
            columns,
            cell_size,
            row_height: row_height.max(1.0),
            scroll_y: scroll_y.max(0.0),
            viewport_height: viewport_height.max(0.0),
        }
    }

    /// Number of rows needed for `item_count` cells
    pub fn row_count(&self, item_count: usize) -> usize {
        item_count.div_ceil(self.columns.max(1))
    }

    /// Rows intersecting the viewport, clamped to the rows that exist
    pub fn visible_rows(&self, item_count: usize) -> Range<usize> {
        let rows = self.row_count(item_count);
        if rows == 0 || self.viewport_height <= 0.0 {
            return 0..0;
        }
        let first = ((self.scroll_y / self.row_height).floor() as usize).min(rows);
        let bottom = self.scroll_y + self.viewport_height;
        let last = ((bottom / self.row_height).ceil() as usize).min(rows);
        first..last.max(first)
    }

    /// Indices of the first through last visible cell, row-major
    pub fn visible_range(&self, item_count: usize) -> Range<usize> {
        self.cells_in_rows(self.visible_rows(item_count), item_count)
    }

    fn cells_in_rows(&self, rows: Range<usize>, item_count: usize) -> Range<usize> {
        let start = (rows.start * self.columns).min(item_count);
        let end = (rows.end * self.columns).min(item_count);
        start..end
    }

    /// Thumbnail decode size for this layout
    pub fn target_size(&self) -> u32 {
        self.cell_size.round().max(1.0) as u32
    }
}

/// One cell's identity and where its artwork lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridItem {
    pub key: CacheKey,
    pub source: ArtSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub requests_per_tick: usize,
    /// Rows past each edge of the viewport to prefetch
    pub prefetch_rows: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            requests_per_tick: DEFAULT_REQUESTS_PER_TICK,
            prefetch_rows: 1,
        }
    }
}

struct Planned {
    item: GridItem,
    priority: Priority,
}

/// Drives thumbnail requests for one grid view.
///
/// [`ViewportCoordinator::refresh`] replans on every layout or scroll
/// change; [`ViewportCoordinator::tick`] drip-feeds the plan from a repeating
/// timer; [`ViewportCoordinator::on_event`] settles cells as thumbnails
/// arrive. `awaiting` is the completion counter: the timer can stop once it
/// and the plan are empty.
pub struct ViewportCoordinator {
    service: Arc<ThumbnailService>,
    settings: CoordinatorSettings,
    plan: VecDeque<Planned>,
    /// Visible keys requested (or planned) but not yet settled
    awaiting: HashSet<CacheKey>,
    /// Visible items, kept to re-plan keys whose result came back stale
    visible_items: Vec<GridItem>,
    /// Visible keys already re-requested after eviction since the last refresh
    reissued: HashSet<CacheKey>,
    visible: Range<usize>,
    target_size: u32,
}

impl ViewportCoordinator {
    pub fn new(service: Arc<ThumbnailService>, settings: CoordinatorSettings) -> Self {
        Self {
            service,
            settings: CoordinatorSettings {
                requests_per_tick: settings.requests_per_tick.max(1),
                ..settings
            },
            plan: VecDeque::new(),
            awaiting: HashSet::new(),
            visible_items: Vec::new(),
            reissued: HashSet::new(),
            visible: 0..0,
            target_size: 0,
        }
    }

    /// Recompute the visible set and replan requests for it.
    /// Issues the first batch immediately.
    pub fn refresh(&mut self, geometry: &GridGeometry, items: &[GridItem]) -> usize {
        let visible = geometry.visible_range(items.len());
        let target_size = geometry.target_size();

        self.plan.clear();
        self.awaiting.clear();
        self.reissued.clear();
        self.visible_items = items[visible.clone()].to_vec();
        self.visible = visible.clone();
        self.target_size = target_size;

        for item in &items[visible] {
            if self.service.lookup(&item.key, target_size).is_settled() {
                continue;
            }
            self.awaiting.insert(item.key.clone());
            self.plan.push_back(Planned {
                item: item.clone(),
                priority: Priority::Visible,
            });
        }

        for index in self.prefetch_indices(geometry, items.len()) {
            let item = &items[index];
            let state = self.service.lookup(&item.key, target_size);
            if matches!(state, CellState::Missing | CellState::Stale(_)) {
                self.plan.push_back(Planned {
                    item: item.clone(),
                    priority: Priority::Prefetch,
                });
            }
        }

        log::debug!(
            "Viewport {:?}: {} visible awaiting, {} planned",
            self.visible,
            self.awaiting.len(),
            self.plan.len()
        );
        self.tick()
    }

    /// Rows just below the viewport first, then just above it
    fn prefetch_indices(&self, geometry: &GridGeometry, item_count: usize) -> Vec<usize> {
        let rows = geometry.visible_rows(item_count);
        let total_rows = geometry.row_count(item_count);
        let below = rows.end..(rows.end + self.settings.prefetch_rows).min(total_rows);
        let above = rows.start.saturating_sub(self.settings.prefetch_rows)..rows.start;

        let below = geometry.cells_in_rows(below, item_count);
        let above = geometry.cells_in_rows(above, item_count);
        below.chain(above).collect()
    }

    /// Hand up to `requests_per_tick` new requests to the loader.
    /// Returns how many were actually queued.
    pub fn tick(&mut self) -> usize {
        let mut issued = 0;
        while issued < self.settings.requests_per_tick {
            let Some(planned) = self.plan.pop_front() else {
                break;
            };
            let key = planned.item.key.clone();
            let outcome = self
                .service
                .request(planned.item.key, planned.item.source, self.target_size, planned.priority);

            match outcome {
                RequestOutcome::Queued | RequestOutcome::Promoted => issued += 1,
                RequestOutcome::AlreadyPending => {}
                RequestOutcome::Cached | RequestOutcome::Blacklisted | RequestOutcome::Dropped => {
                    self.awaiting.remove(&key);
                }
            }
        }
        issued
    }

    /// Account for a finished load. Returns `true` if a visible cell
    /// changed and the view should repaint.
    pub fn on_event(&mut self, event: &ThumbnailEvent) -> bool {
        let mut repaint = false;

        if self.awaiting.contains(&event.key) {
            repaint = true;
            match self.service.lookup(&event.key, self.target_size) {
                CellState::Stale(_) => {
                    // Finished at an older size; ask again at the current one
                    match self.visible_items.iter().find(|i| i.key == event.key) {
                        Some(item) => self.plan.push_front(Planned {
                            item: item.clone(),
                            priority: Priority::Visible,
                        }),
                        None => {
                            self.awaiting.remove(&event.key);
                        }
                    }
                }
                // A newer request for the key is already in flight
                CellState::Loading => {}
                // Settled, or evicted before this event was seen
                _ => {
                    self.awaiting.remove(&event.key);
                }
            }
        }

        // Every publish may have evicted something on screen
        repaint |= self.reissue_evicted() > 0;
        repaint
    }

    /// Re-plan visible cells that were evicted after they settled. Each key
    /// is re-requested at most once per refresh, so a budget too small for
    /// the viewport cannot keep the loader spinning.
    fn reissue_evicted(&mut self) -> usize {
        let mut reissued = 0;
        for item in &self.visible_items {
            if self.awaiting.contains(&item.key) || self.reissued.contains(&item.key) {
                continue;
            }
            if self.service.lookup(&item.key, self.target_size) != CellState::Missing {
                continue;
            }
            self.reissued.insert(item.key.clone());
            self.awaiting.insert(item.key.clone());
            self.plan.push_back(Planned {
                item: item.clone(),
                priority: Priority::Visible,
            });
            reissued += 1;
        }

        if reissued > 0 {
            log::debug!("Re-requesting {} evicted visible thumbnail(s)", reissued);
        }
        reissued
    }

    /// True while the drip-feed timer should keep running
    pub fn needs_tick(&self) -> bool {
        !self.plan.is_empty() || !self.awaiting.is_empty()
    }

    /// Visible cells not yet settled
    pub fn outstanding(&self) -> usize {
        self.awaiting.len()
    }

    pub fn all_visible_ready(&self) -> bool {
        self.awaiting.is_empty()
    }

    pub fn visible(&self) -> Range<usize> {
        self.visible.clone()
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// What the cell for `key` should draw at the current size
    pub fn cell_state(&self, key: &CacheKey) -> CellState {
        self.service.lookup(key, self.target_size)
    }

    pub fn service(&self) -> &Arc<ThumbnailService> {
        &self.service
    }
}
