#![forbid(unsafe_code)]

//! Grid layout reconciler.
//!
//! # Design
//!
//! [`GridLayout`] is the only writer of a grid's ordered children list. Every
//! change goes through [`GridLayout::replace_children`], which installs the
//! whole list at once inside a [`BatchScope`] so observers never see a
//! half-updated list.
//!
//! Relayout requests arriving while a replacement is in flight (a repeat
//! cycle triggered by the newly activated children, for example) are
//! recorded and run once after the outermost replacement completes.
//!
//! # Invariants
//!
//! 1. Child keys are unique within a grid.
//! 2. After [`GridLayout::force_relayout`] no two visible items overlap and
//!    no item can move up without overlapping another.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use dashgrid_core::geometry::{max_bottom, min_top};
use dashgrid_core::{BatchScope, GridPos, Observable, Subscription};
use dashgrid_scene::{NodeCore, NodeRef, SceneObject, SceneState, VariableSet, mount};
use tracing::{debug, debug_span, trace, warn};
use web_time::Instant;

use crate::geometry::{LayoutBlock, compact_blocks};
use crate::panel::{PanelItem, VizPanel};
use crate::repeat::is_clone_of;
use crate::row::GridRow;

/// Numeric id of a `panel-{id}` key, ignoring any clone suffix.
#[must_use]
pub fn panel_id_from_key(key: &str) -> Option<u32> {
    let rest = key.strip_prefix("panel-")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

// ============================================================================
// GridChild
// ============================================================================

/// A direct child of a grid.
#[derive(Debug, Clone)]
pub enum GridChild {
    Panel(Rc<PanelItem>),
    Row(Rc<GridRow>),
}

impl GridChild {
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Panel(item) => item.key(),
            Self::Row(row) => row.key(),
        }
    }

    #[must_use]
    pub fn pos(&self) -> GridPos {
        match self {
            Self::Panel(item) => item.pos(),
            Self::Row(row) => row.pos(),
        }
    }

    /// Move vertically by `delta` rows; a row moves its items along.
    pub fn shift(&self, delta: i64) {
        match self {
            Self::Panel(item) => item.shift(delta),
            Self::Row(row) => row.shift(delta),
        }
    }

    #[must_use]
    pub fn node(&self) -> NodeRef {
        match self {
            Self::Panel(item) => Rc::clone(item) as NodeRef,
            Self::Row(row) => Rc::clone(row) as NodeRef,
        }
    }

    #[must_use]
    pub fn as_row(&self) -> Option<&Rc<GridRow>> {
        match self {
            Self::Row(row) => Some(row),
            Self::Panel(_) => None,
        }
    }

    #[must_use]
    pub fn as_panel(&self) -> Option<&Rc<PanelItem>> {
        match self {
            Self::Panel(item) => Some(item),
            Self::Row(_) => None,
        }
    }

    fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Panel(a), Self::Panel(b)) => Rc::ptr_eq(a, b),
            (Self::Row(a), Self::Row(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Rc<PanelItem>> for GridChild {
    fn from(item: Rc<PanelItem>) -> Self {
        Self::Panel(item)
    }
}

impl From<Rc<GridRow>> for GridChild {
    fn from(row: Rc<GridRow>) -> Self {
        Self::Row(row)
    }
}

// ============================================================================
// GridLayout
// ============================================================================

#[derive(Debug, Clone)]
pub struct GridLayoutState {
    pub key: String,
    pub variables: Option<VariableSet>,
    pub children: Vec<GridChild>,
}

impl SceneState for GridLayoutState {
    fn children(&self) -> Vec<NodeRef> {
        self.children.iter().map(GridChild::node).collect()
    }
}

/// Ordered children of a dashboard grid.
pub struct GridLayout {
    core: NodeCore,
    state: Observable<GridLayoutState>,
    replace_depth: Cell<u32>,
    relayout_pending: Cell<bool>,
}

impl GridLayout {
    pub fn new(key: &str, children: Vec<GridChild>) -> Rc<Self> {
        Self::from_state(GridLayoutState {
            key: key.to_string(),
            variables: None,
            children,
        })
    }

    /// A grid declaring its own variables, for grids used without a
    /// dashboard around them.
    pub fn with_variables(key: &str, variables: VariableSet, children: Vec<GridChild>) -> Rc<Self> {
        Self::from_state(GridLayoutState {
            key: key.to_string(),
            variables: Some(variables),
            children,
        })
    }

    fn from_state(state: GridLayoutState) -> Rc<Self> {
        mount(Self {
            core: NodeCore::new(),
            state: Observable::new(state),
            replace_depth: Cell::new(0),
            relayout_pending: Cell::new(false),
        })
    }

    #[must_use]
    pub fn children(&self) -> Vec<GridChild> {
        self.state.with(|s| s.children.clone())
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&GridLayoutState) + 'static) -> Subscription {
        self.state.subscribe(callback)
    }

    /// Append `child` at the end. Returns `false` if its key is taken.
    pub fn append(&self, child: impl Into<GridChild>) -> bool {
        let child = child.into();
        let key = child.key();
        let mut children = self.children();
        if children.iter().any(|c| c.key() == key) {
            warn!(grid = %self.key(), key = %key, "duplicate grid child key");
            return false;
        }
        children.push(child);
        self.replace_children(children);
        true
    }

    /// Remove the child keyed `key`.
    pub fn remove(&self, key: &str) -> Option<GridChild> {
        let mut children = self.children();
        let index = children.iter().position(|c| c.key() == key)?;
        let removed = children.remove(index);
        self.replace_children(children);
        Some(removed)
    }

    /// Install `children` as the complete, ordered children list.
    pub fn replace_children(&self, children: Vec<GridChild>) {
        self.replace_depth.set(self.replace_depth.get() + 1);
        {
            let _batch = BatchScope::new();
            let mut next = self.state.get();
            next.children = children;
            self.core.commit(&self.state, next);
        }
        self.replace_depth.set(self.replace_depth.get() - 1);

        if self.replace_depth.get() == 0 && self.relayout_pending.replace(false) {
            self.force_relayout();
        }
    }

    /// Replace a repeated row's block with `rows`.
    ///
    /// Every earlier clone of `row` is dropped, `rows` are spliced in at the
    /// row's position and every child after the block moves so that the
    /// first of them starts at `block_end`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is not among this grid's children.
    pub(crate) fn splice_repeated_rows(&self, row: &Rc<GridRow>, rows: Vec<Rc<GridRow>>, block_end: u32) {
        let row_key = row.key();
        let mut children: Vec<GridChild> = self
            .children()
            .into_iter()
            .filter(|c| !is_clone_of(&c.key(), &row_key))
            .collect();
        let source = GridChild::Row(Rc::clone(row));
        let Some(index) = children.iter().position(|c| c.is(&source)) else {
            panic!("row `{row_key}` is not a child of grid `{}`", self.key());
        };

        let after = children.split_off(index + 1);
        children.pop();
        if let Some(first) = after.first() {
            let delta = i64::from(block_end) - i64::from(first.pos().y);
            if delta != 0 {
                trace!(row = %row_key, delta, siblings = after.len(), "shifting siblings");
                for child in &after {
                    child.shift(delta);
                }
            }
        }

        children.extend(rows.into_iter().map(GridChild::Row));
        children.extend(after);
        self.replace_children(children);
    }

    /// Compact the layout vertically and re-sort children by position.
    ///
    /// Rows and the items of expanded rows take part; items of collapsed rows
    /// keep their stored positions. Deferred while a replacement is running.
    pub fn force_relayout(&self) {
        if self.replace_depth.get() > 0 {
            self.relayout_pending.set(true);
            trace!(grid = %self.key(), "relayout deferred");
            return;
        }

        let started = Instant::now();
        let _span = debug_span!("grid.relayout", grid = %self.key(), moved = tracing::field::Empty)
            .entered();

        let children = self.children();
        let blocks: Vec<LayoutBlock> = children
            .iter()
            .map(|child| match child {
                GridChild::Row(row) if !row.is_collapsed() => LayoutBlock::row(
                    row.pos(),
                    row.items().iter().map(|item| item.pos()).collect(),
                ),
                GridChild::Row(row) => LayoutBlock::row(row.pos(), Vec::new()),
                GridChild::Panel(item) => LayoutBlock::item(item.pos()),
            })
            .collect();
        let compacted = compact_blocks(&blocks);

        let _batch = BatchScope::new();
        let mut moved = 0u32;
        for ((child, old), new) in children.iter().zip(&blocks).zip(&compacted) {
            if old.head != new.head {
                match child {
                    GridChild::Panel(item) => item.set_pos(new.head),
                    GridChild::Row(row) => row.set_header_pos(new.head),
                }
                moved += 1;
            }
            if let GridChild::Row(row) = child
                && !row.is_collapsed()
            {
                for ((item, from), to) in row.items().iter().zip(&old.items).zip(&new.items) {
                    if from != to {
                        item.set_pos(*to);
                        moved += 1;
                    }
                }
            }
        }

        let mut sorted = children.clone();
        sorted.sort_by_key(|c| {
            let pos = c.pos();
            (pos.y, pos.x)
        });
        if sorted.iter().zip(&children).any(|(a, b)| !a.is(b)) {
            let mut next = self.state.get();
            next.children = sorted;
            self.core.commit(&self.state, next);
        }

        tracing::Span::current().record("moved", moved);
        debug!(
            grid = %self.key(),
            moved,
            duration_us = started.elapsed().as_micros() as u64,
            "relayout"
        );
    }

    /// Collapse or expand the row keyed `key`.
    ///
    /// Expanding moves the row's items directly below its header and pushes
    /// everything below the header down by their height. Returns `false`
    /// when no such row exists.
    pub fn toggle_row(&self, key: &str) -> bool {
        let Some(row) = self.find_row(key) else {
            warn!(grid = %self.key(), key, "toggle of unknown row");
            return false;
        };

        {
            let _batch = BatchScope::new();
            if row.is_collapsed() {
                let row_y = row.pos().y;
                let items = row.items();
                let positions: Vec<GridPos> = items.iter().map(|item| item.pos()).collect();
                if let Some(top) = min_top(&positions) {
                    let delta = i64::from(row_y + 1) - i64::from(top);
                    for item in &items {
                        item.shift(delta);
                    }
                }
                let expanded: Vec<GridPos> = items.iter().map(|item| item.pos()).collect();
                let push = max_bottom(&expanded).map_or(0, |bottom| bottom.saturating_sub(row_y + 1));
                if push > 0 {
                    for child in self.children() {
                        if child.pos().y > row_y {
                            child.shift(i64::from(push));
                        }
                    }
                }
                row.set_collapsed(false);
            } else {
                row.set_collapsed(true);
            }
        }

        self.force_relayout();
        true
    }

    /// Next free numeric panel id: one past the highest id used anywhere in
    /// the grid, clones included.
    #[must_use]
    pub fn next_panel_id(&self) -> u32 {
        let mut max = 0;
        let mut note = |key: String| {
            if let Some(id) = panel_id_from_key(&key) {
                max = max.max(id);
            }
        };
        for child in self.children() {
            if let GridChild::Row(row) = &child {
                note(row.key());
            }
        }
        for item in self.panel_items() {
            note(item.body().key());
            for panel in item.repeated_panels() {
                note(panel.key());
            }
        }
        max + 1
    }

    /// Every panel item of the grid, including those inside rows.
    #[must_use]
    pub fn panel_items(&self) -> Vec<Rc<PanelItem>> {
        let mut items = Vec::new();
        for child in self.children() {
            match child {
                GridChild::Panel(item) => items.push(item),
                GridChild::Row(row) => items.extend(row.items()),
            }
        }
        items
    }

    #[must_use]
    pub fn rows(&self) -> Vec<Rc<GridRow>> {
        self.children()
            .into_iter()
            .filter_map(|c| c.as_row().cloned())
            .collect()
    }

    #[must_use]
    pub fn find_row(&self, key: &str) -> Option<Rc<GridRow>> {
        self.rows().into_iter().find(|row| row.key() == key)
    }

    #[must_use]
    pub fn find_item(&self, key: &str) -> Option<Rc<PanelItem>> {
        self.panel_items().into_iter().find(|item| item.key() == key)
    }

    /// Any panel, template or clone, keyed `key`.
    #[must_use]
    pub fn find_panel(&self, key: &str) -> Option<Rc<VizPanel>> {
        self.panel_items().into_iter().find_map(|item| {
            std::iter::once(item.body())
                .chain(item.repeated_panels())
                .find(|panel| panel.key() == key)
        })
    }
}

impl SceneObject for GridLayout {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn key(&self) -> String {
        self.state.with(|s| s.key.clone())
    }

    fn children(&self) -> Vec<NodeRef> {
        self.state.with(|s| s.children())
    }

    fn variables(&self) -> Option<VariableSet> {
        self.state.with(|s| s.variables.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for GridLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.with(|s| {
            f.debug_struct("GridLayout")
                .field("key", &s.key)
                .field("children", &s.children.len())
                .finish_non_exhaustive()
        })
    }
}
