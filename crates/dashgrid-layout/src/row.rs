#![forbid(unsafe_code)]

//! Rows and the row repeat behavior.
//!
//! # Design
//!
//! A [`GridRow`] is a full-width header owning the panel items below it.
//! Capabilities attach to a row as [`RowBehavior`] values; the only one is
//! [`RowRepeater`], which repeats the whole row once per value of a
//! multi-value variable.
//!
//! The source row is instance 0: it keeps its place and its original
//! items and gains a local binding for the first value. Every further value
//! gets a physical clone keyed `{row_key}-clone-{value}`, stacked below the
//! previous instance, with its items re-keyed the same way. Clones carry no
//! behaviors and no header actions.
//!
//! # Failure Modes
//!
//! - **Variable still loading**: the cycle is skipped and the waiting flag
//!   set; the row keeps its current instances.
//! - **Variable missing**: logged at `warn`, instances kept.
//! - **Variable not multi-value**: logged at `error`, instances kept.
//!
//! # Panics
//!
//! A repeater outside a row, a row outside a grid or a source row missing
//! from its grid's children is a corrupted tree and panics.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use dashgrid_core::geometry::max_bottom;
use dashgrid_core::{BatchScope, GridPos, Observable, Subscription};
use dashgrid_scene::{
    NodeCore, NodeRef, RepeatKind, SceneEvent, SceneNodeExt, SceneObject, SceneState, Teardown,
    VariableDependency, VariableSet, downcast_node, mount, mount_cyclic,
};
use tracing::{debug, error, info_span, warn};
use web_time::Instant;

use crate::geometry::{RepeatGeometry, RowStackGeometry};
use crate::grid::GridLayout;
use crate::panel::PanelItem;
use crate::repeat::{
    RepeatBinding, RepeatCycle, RepeatError, RepeatPhase, clone_key, clone_per_value,
    is_clone_key, resolve_repeat_variable, with_placeholder,
};

/// Header actions of an authored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowActions {
    pub items: Vec<String>,
}

impl Default for RowActions {
    fn default() -> Self {
        Self {
            items: vec!["settings".to_string(), "delete".to_string()],
        }
    }
}

/// Capability attached to a row.
#[derive(Debug, Clone)]
pub enum RowBehavior {
    Repeat(Rc<RowRepeater>),
}

impl RowBehavior {
    fn node(&self) -> NodeRef {
        match self {
            Self::Repeat(repeater) => Rc::clone(repeater) as NodeRef,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridRowState {
    pub key: String,
    pub title: String,
    /// Header position.
    pub pos: GridPos,
    pub collapsed: bool,
    pub children: Vec<Rc<PanelItem>>,
    pub variables: Option<VariableSet>,
    pub behaviors: Vec<RowBehavior>,
    pub actions: Option<RowActions>,
}

impl SceneState for GridRowState {
    fn children(&self) -> Vec<NodeRef> {
        self.children
            .iter()
            .map(|item| Rc::clone(item) as NodeRef)
            .chain(self.behaviors.iter().map(RowBehavior::node))
            .collect()
    }
}

// ============================================================================
// GridRow
// ============================================================================

/// A collapsible row of panel items.
pub struct GridRow {
    core: NodeCore,
    state: Observable<GridRowState>,
}

impl GridRow {
    pub fn new(state: GridRowState) -> Rc<Self> {
        mount(Self {
            core: NodeCore::new(),
            state: Observable::new(state),
        })
    }

    /// An expanded, authored row with its header at `y`.
    pub fn build(key: &str, title: &str, y: u32, children: Vec<Rc<PanelItem>>) -> Rc<Self> {
        Self::new(GridRowState {
            key: key.to_string(),
            title: title.to_string(),
            pos: GridPos::row_header(y),
            collapsed: false,
            children,
            variables: None,
            behaviors: Vec::new(),
            actions: Some(RowActions::default()),
        })
    }

    #[must_use]
    pub fn state(&self) -> GridRowState {
        self.state.get()
    }

    #[must_use]
    pub fn title(&self) -> String {
        self.state.with(|s| s.title.clone())
    }

    #[must_use]
    pub fn pos(&self) -> GridPos {
        self.state.with(|s| s.pos)
    }

    #[must_use]
    pub fn items(&self) -> Vec<Rc<PanelItem>> {
        self.state.with(|s| s.children.clone())
    }

    #[must_use]
    pub fn is_collapsed(&self) -> bool {
        self.state.with(|s| s.collapsed)
    }

    #[must_use]
    pub fn actions(&self) -> Option<RowActions> {
        self.state.with(|s| s.actions.clone())
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&GridRowState) + 'static) -> Subscription {
        self.state.subscribe(callback)
    }

    fn update(&self, f: impl FnOnce(&mut GridRowState)) {
        let mut next = self.state.get();
        f(&mut next);
        self.core.commit(&self.state, next);
    }

    pub fn set_collapsed(&self, collapsed: bool) {
        if self.is_collapsed() != collapsed {
            self.update(|s| s.collapsed = collapsed);
        }
    }

    pub fn set_items(&self, children: Vec<Rc<PanelItem>>) {
        self.update(|s| s.children = children);
    }

    /// Move the header only.
    pub fn set_header_pos(&self, pos: GridPos) {
        if self.pos() != pos {
            self.update(|s| s.pos = pos);
        }
    }

    /// Move the header and every item by `delta` rows.
    pub fn shift(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.update(|s| s.pos = s.pos.shifted(delta));
        for item in self.items() {
            item.shift(delta);
        }
    }

    /// First grid row below this row's block: below the header when
    /// collapsed or empty, else below the lowest item.
    #[must_use]
    pub fn block_bottom(&self) -> u32 {
        self.state.with(|s| {
            let header = s.pos.bottom();
            if s.collapsed {
                return header;
            }
            let positions: Vec<GridPos> = s.children.iter().map(|item| item.pos()).collect();
            max_bottom(&positions).map_or(header, |bottom| bottom.max(header))
        })
    }

    #[must_use]
    pub fn repeater(&self) -> Option<Rc<RowRepeater>> {
        self.state.with(|s| {
            s.behaviors.iter().find_map(|behavior| match behavior {
                RowBehavior::Repeat(repeater) => Some(Rc::clone(repeater)),
            })
        })
    }

    /// Repeat this row over `variable_name`, attaching a repeater if the row
    /// has none.
    pub fn set_repeat(&self, variable_name: &str) -> Rc<RowRepeater> {
        if let Some(repeater) = self.repeater() {
            repeater.set_variable_name(variable_name);
            return repeater;
        }
        let repeater = RowRepeater::new(variable_name);
        self.update(|s| s.behaviors.push(RowBehavior::Repeat(Rc::clone(&repeater))));
        repeater
    }

    /// Whether this row was produced by a repeat cycle.
    #[must_use]
    pub fn is_repeat_clone(&self) -> bool {
        self.state
            .with(|s| is_clone_key(&s.key) && s.behaviors.is_empty())
    }

    /// Turn this row into instance 0 of a repeat.
    pub(crate) fn apply_repeat_instance(&self, variables: VariableSet, children: Vec<Rc<PanelItem>>) {
        self.update(|s| {
            s.variables = Some(variables);
            s.children = children;
        });
    }

    /// Unmounted clone of this row for `value`, moved down by `delta` rows.
    pub(crate) fn repeat_clone(
        &self,
        value: &str,
        delta: i64,
        variables: VariableSet,
        sources: &[Rc<PanelItem>],
    ) -> Rc<Self> {
        let state = self.state.get();
        Self::new(GridRowState {
            key: clone_key(&state.key, value),
            title: state.title,
            pos: state.pos.shifted(delta),
            collapsed: state.collapsed,
            children: sources
                .iter()
                .map(|item| item.clone_for_row(value, delta))
                .collect(),
            variables: Some(variables),
            behaviors: Vec::new(),
            actions: None,
        })
    }

    /// Drop `repeater` and restore the row's own items.
    pub(crate) fn detach_behavior(&self, repeater: &RowRepeater, children: Vec<Rc<PanelItem>>) {
        self.update(|s| {
            s.behaviors.retain(|behavior| match behavior {
                RowBehavior::Repeat(r) => !std::ptr::eq(Rc::as_ptr(r), repeater),
            });
            s.variables = None;
            s.children = children;
        });
    }
}

impl SceneObject for GridRow {
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

impl fmt::Debug for GridRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.with(|s| {
            f.debug_struct("GridRow")
                .field("key", &s.key)
                .field("pos", &s.pos)
                .field("collapsed", &s.collapsed)
                .field("children", &s.children.len())
                .finish_non_exhaustive()
        })
    }
}

// ============================================================================
// RowRepeater
// ============================================================================

/// Repeats its row once per value of a multi-value variable.
pub struct RowRepeater {
    core: NodeCore,
    me: Weak<RowRepeater>,
    variable_name: RefCell<String>,
    cycle: RepeatCycle,
    dependency: RefCell<Option<VariableDependency>>,
}

impl RowRepeater {
    pub fn new(variable_name: &str) -> Rc<Self> {
        mount_cyclic(|me| Self {
            core: NodeCore::new(),
            me: me.clone(),
            variable_name: RefCell::new(variable_name.to_string()),
            cycle: RepeatCycle::new(),
            dependency: RefCell::new(None),
        })
    }

    #[must_use]
    pub fn variable_name(&self) -> String {
        self.variable_name.borrow().clone()
    }

    /// Whether the last cycle was skipped because the variable was loading.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.cycle.is_waiting()
    }

    #[must_use]
    pub fn phase(&self) -> RepeatPhase {
        self.cycle.phase()
    }

    /// Repeat over a different variable.
    pub fn set_variable_name(&self, name: &str) {
        if *self.variable_name.borrow() == name {
            return;
        }
        *self.variable_name.borrow_mut() = name.to_string();
        self.cycle.reset();
        if let Some(dependency) = self.dependency.borrow().as_ref() {
            dependency.set_variable_names([name]);
        }
        if self.is_active() {
            self.perform_repeat();
        }
    }

    /// The row this behavior is attached to.
    ///
    /// # Panics
    ///
    /// Panics if the repeater is not attached to a [`GridRow`].
    fn row(&self) -> Rc<GridRow> {
        let Some(row) = self
            .core
            .parent()
            .and_then(|parent| downcast_node::<GridRow>(&parent))
        else {
            panic!("row repeat behavior `{}` is not attached to a row", self.key());
        };
        row
    }

    /// # Panics
    ///
    /// Panics if `row` is not a child of a [`GridLayout`].
    fn grid_of(row: &GridRow) -> Rc<GridLayout> {
        let Some(grid) = row
            .parent()
            .and_then(|parent| downcast_node::<GridLayout>(&parent))
        else {
            panic!("row `{}` is not attached to a grid", row.key());
        };
        grid
    }

    /// Run one repeat cycle and splice the resulting rows into the grid.
    ///
    /// # Panics
    ///
    /// Panics when the tree around the repeater is corrupted; see the
    /// module documentation.
    pub fn perform_repeat(&self) {
        let Some(phase) = self.cycle.enter(RepeatPhase::Cycling) else {
            debug!(repeater = %self.key(), "row repeat rejected, busy");
            return;
        };
        let row = self.row();
        let grid = Self::grid_of(&row);
        let name = self.variable_name();

        if self
            .dependency
            .borrow()
            .as_ref()
            .is_some_and(VariableDependency::has_unresolved_dependency)
        {
            self.cycle.set_waiting(true);
            return;
        }

        // The source row carries a local binding for the same name, so the
        // variable is resolved from the grid.
        let variable = match resolve_repeat_variable(&name, &*grid) {
            Ok(variable) => variable,
            Err(err @ RepeatError::VariableNotFound { .. }) => {
                warn!(row = %row.key(), %err, "row repeat aborted");
                return;
            }
            Err(err) => {
                error!(row = %row.key(), %err, "row repeat aborted");
                return;
            }
        };
        if variable.is_loading() {
            self.cycle.set_waiting(true);
            return;
        }

        let values = variable.values();
        self.cycle.set_waiting(false);
        if self.cycle.is_unchanged(&values) {
            debug!(row = %row.key(), "row repeat skipped, values unchanged");
            return;
        }
        self.cycle.record(values.clone());
        let values = with_placeholder(values, variable.has_all_value());
        let binding = RepeatBinding::of(&variable);

        // Instance 0 keeps the source items, so the row's current items are
        // the template on every cycle.
        let sources = row.items();
        let positions: Vec<GridPos> = sources.iter().map(|item| item.pos()).collect();
        let stack = RowStackGeometry::from_children(&positions, row.is_collapsed());

        let started = Instant::now();
        let span = info_span!(
            "repeat.cycle",
            kind = "row",
            key = %row.key(),
            variable = %binding.name,
            clones = values.len(),
            block_height = tracing::field::Empty,
            duration_us = tracing::field::Empty
        );
        let _span = span.enter();

        {
            let _batch = BatchScope::new();
            let rows = clone_per_value(&binding, &values, |slot| {
                if slot.index == 0 {
                    row.apply_repeat_instance(slot.variables, sources.clone());
                    Rc::clone(&row)
                } else {
                    let delta = i64::from(stack.offset(slot.index));
                    row.repeat_clone(&slot.value, delta, slot.variables, &sources)
                }
            });
            let block_end = rows
                .iter()
                .map(|r| r.block_bottom())
                .max()
                .unwrap_or_else(|| row.block_bottom());
            span.record("block_height", block_end.saturating_sub(row.pos().y));
            grid.splice_repeated_rows(&row, rows, block_end);
        }
        drop(phase);

        span.record("duration_us", started.elapsed().as_micros() as u64);
        if let Some(event) = SceneEvent::repeats_processed(&*row, RepeatKind::Row) {
            row.publish_event(&event, true);
        }
    }

    /// Detach this behavior from its row, dropping every clone and the row's
    /// local binding, and close the gap the clones leave behind.
    ///
    /// # Panics
    ///
    /// Panics when the tree around the repeater is corrupted.
    pub fn remove_behavior(&self) {
        let row = self.row();
        let grid = Self::grid_of(&row);
        let sources = row.items();
        {
            let _batch = BatchScope::new();
            row.detach_behavior(self, sources);
            let block_end = row.block_bottom();
            grid.splice_repeated_rows(&row, vec![Rc::clone(&row)], block_end);
        }
        self.cycle.reset();
        debug!(row = %row.key(), "row repeat removed");
    }
}

impl SceneObject for RowRepeater {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn key(&self) -> String {
        format!("repeat:{}", self.variable_name.borrow())
    }

    fn children(&self) -> Vec<NodeRef> {
        Vec::new()
    }

    fn on_activate(&self) -> Option<Teardown> {
        let grid = Self::grid_of(&self.row());
        let me = self.me.clone();
        let dependency = VariableDependency::new([self.variable_name()], move || {
            if let Some(repeater) = me.upgrade() {
                repeater.perform_repeat();
            }
        });
        dependency.activate(&*grid);
        *self.dependency.borrow_mut() = Some(dependency);

        self.perform_repeat();

        let me = self.me.clone();
        Some(Box::new(move || {
            if let Some(repeater) = me.upgrade()
                && let Some(dependency) = repeater.dependency.borrow_mut().take()
            {
                dependency.deactivate();
            }
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for RowRepeater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowRepeater")
            .field("variable_name", &self.variable_name.borrow())
            .field("phase", &self.cycle.phase())
            .field("waiting", &self.cycle.is_waiting())
            .finish_non_exhaustive()
    }
}
