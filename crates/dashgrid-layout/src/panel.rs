#![forbid(unsafe_code)]

//! Panels and the panel repeat node.
//!
//! # Design
//!
//! A [`PanelItem`] is one grid item. It owns a template [`VizPanel`] (its
//! `body`) and, when [`RepeatOptions`] are attached, a list of
//! `repeated_panels` produced by a repeat cycle: one clone of the body per
//! value of the repeat variable, each bound to that value through a local
//! variable. The item's height follows the clone count through a
//! [`FlowGeometry`].
//!
//! # Invariants
//!
//! 1. The body is never mutated by a cycle; clones are fresh nodes keyed
//!    `{body_key}-clone-{index}`.
//! 2. A cycle with an unchanged value list writes nothing.
//! 3. A height change made by a cycle never feeds back into `item_height`.
//!    Only a height change made from outside (a user resize) does.
//!
//! # Failure Modes
//!
//! - **Variable still loading**: the cycle is skipped and the waiting flag
//!   set; previously rendered clones stay.
//! - **Variable missing**: one placeholder clone is rendered.
//! - **Variable not multi-value**: logged at `error` and skipped.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use dashgrid_core::{GridPos, Observable, Subscription};
use dashgrid_scene::{
    LocalValueVariable, NodeCore, NodeRef, RepeatKind, RepeatValues, SceneEvent, SceneNodeExt,
    SceneObject, SceneState, Teardown, Variable, VariableDependency, VariableSet, find_ancestor,
    interpolate, lookup_variable, mount, mount_cyclic,
};
use serde_json::Value;
use tracing::{debug, error, info_span};
use web_time::Instant;

use crate::geometry::{FlowGeometry, RepeatDirection};
use crate::grid::GridLayout;
use crate::repeat::{
    RepeatBinding, RepeatCycle, RepeatError, RepeatPhase, clone_key, clone_per_value,
    resolve_repeat_variable, with_placeholder,
};

// ============================================================================
// VizPanel
// ============================================================================

/// Header menu a panel shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PanelMenu {
    /// Full menu of an authored panel.
    #[default]
    Authored,
    /// Reduced menu of a repeat clone, which cannot be edited on its own.
    Repeated,
}

impl PanelMenu {
    #[must_use]
    pub fn actions(self) -> &'static [&'static str] {
        match self {
            Self::Authored => &["view", "edit", "share", "explore", "inspect", "remove"],
            Self::Repeated => &["view", "share", "explore", "inspect"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct VizPanelState {
    pub key: String,
    pub title: String,
    pub plugin_id: String,
    /// Plugin options, opaque to the layout engine.
    pub options: Value,
    pub menu: PanelMenu,
    pub variables: Option<VariableSet>,
}

impl SceneState for VizPanelState {
    fn children(&self) -> Vec<NodeRef> {
        Vec::new()
    }
}

/// A single visualization. Drawing it is someone else's job.
pub struct VizPanel {
    core: NodeCore,
    state: Observable<VizPanelState>,
}

impl VizPanel {
    pub fn new(state: VizPanelState) -> Rc<Self> {
        mount(Self {
            core: NodeCore::new(),
            state: Observable::new(state),
        })
    }

    pub fn build(key: &str, title: &str, plugin_id: &str) -> Rc<Self> {
        Self::new(VizPanelState {
            key: key.to_string(),
            title: title.to_string(),
            plugin_id: plugin_id.to_string(),
            options: Value::Null,
            menu: PanelMenu::Authored,
            variables: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> VizPanelState {
        self.state.get()
    }

    #[must_use]
    pub fn title(&self) -> String {
        self.state.with(|s| s.title.clone())
    }

    /// Title with variable references resolved from this panel's scope.
    #[must_use]
    pub fn interpolated_title(&self) -> String {
        interpolate(&self.title(), self)
    }

    #[must_use]
    pub fn menu(&self) -> PanelMenu {
        self.state.with(|s| s.menu)
    }

    /// The clone-scoped binding of `name`, if this panel carries one.
    #[must_use]
    pub fn local_value(&self, name: &str) -> Option<LocalValueVariable> {
        self.state.with(|s| match s.variables.as_ref()?.get(name)? {
            Variable::Local(local) => Some(local),
            _ => None,
        })
    }

    pub fn set_title(&self, title: &str) {
        let mut next = self.state.get();
        next.title = title.to_string();
        self.core.commit(&self.state, next);
    }

    /// Fresh copy of this panel under `key`, bound to `variables`.
    pub fn repeat_clone(&self, key: String, variables: VariableSet, menu: PanelMenu) -> Rc<Self> {
        let mut state = self.state.get();
        state.key = key;
        state.variables = Some(variables);
        state.menu = menu;
        Self::new(state)
    }

    /// Fresh copy of this panel under `key`, keeping its bindings.
    pub fn clone_with_key(&self, key: String) -> Rc<Self> {
        let mut state = self.state.get();
        state.key = key;
        Self::new(state)
    }

    pub fn subscribe(&self, callback: impl Fn(&VizPanelState) + 'static) -> Subscription {
        self.state.subscribe(callback)
    }
}

impl SceneObject for VizPanel {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn key(&self) -> String {
        self.state.with(|s| s.key.clone())
    }

    fn children(&self) -> Vec<NodeRef> {
        Vec::new()
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

impl fmt::Debug for VizPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.with(|s| {
            f.debug_struct("VizPanel")
                .field("key", &s.key)
                .field("title", &s.title)
                .field("menu", &s.menu)
                .finish_non_exhaustive()
        })
    }
}

// ============================================================================
// PanelItem
// ============================================================================

/// Repeat capability attached to a [`PanelItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatOptions {
    pub variable_name: String,
    pub direction: RepeatDirection,
    pub max_per_row: Option<u32>,
}

impl RepeatOptions {
    pub fn new(variable_name: impl Into<String>) -> Self {
        Self {
            variable_name: variable_name.into(),
            direction: RepeatDirection::default(),
            max_per_row: None,
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: RepeatDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_max_per_row(mut self, max_per_row: u32) -> Self {
        self.max_per_row = Some(max_per_row);
        self
    }
}

#[derive(Debug, Clone)]
pub struct PanelItemState {
    pub key: String,
    pub pos: GridPos,
    /// The repeat template.
    pub body: Rc<VizPanel>,
    pub repeat: Option<RepeatOptions>,
    /// Height of one clone; `None` falls back to the default.
    pub item_height: Option<u32>,
    pub repeated_panels: Vec<Rc<VizPanel>>,
}

impl SceneState for PanelItemState {
    fn children(&self) -> Vec<NodeRef> {
        std::iter::once(Rc::clone(&self.body) as NodeRef)
            .chain(
                self.repeated_panels
                    .iter()
                    .map(|panel| Rc::clone(panel) as NodeRef),
            )
            .collect()
    }
}

#[derive(Default)]
struct PanelRepeater {
    cycle: RepeatCycle,
    dependency: RefCell<Option<VariableDependency>>,
    resize: RefCell<Option<Subscription>>,
    /// Height written by the last cycle or acknowledged resize.
    last_height: Cell<Option<u32>>,
}

/// A grid item hosting one panel, optionally repeated.
pub struct PanelItem {
    core: NodeCore,
    me: Weak<PanelItem>,
    state: Observable<PanelItemState>,
    repeater: PanelRepeater,
}

impl PanelItem {
    pub fn new(state: PanelItemState) -> Rc<Self> {
        mount_cyclic(|me| Self {
            core: NodeCore::new(),
            me: me.clone(),
            state: Observable::new(state),
            repeater: PanelRepeater::default(),
        })
    }

    pub fn build(key: &str, pos: GridPos, body: Rc<VizPanel>) -> Rc<Self> {
        Self::new(PanelItemState {
            key: key.to_string(),
            pos,
            body,
            repeat: None,
            item_height: None,
            repeated_panels: Vec::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> PanelItemState {
        self.state.get()
    }

    #[must_use]
    pub fn pos(&self) -> GridPos {
        self.state.with(|s| s.pos)
    }

    #[must_use]
    pub fn body(&self) -> Rc<VizPanel> {
        self.state.with(|s| Rc::clone(&s.body))
    }

    #[must_use]
    pub fn repeat(&self) -> Option<RepeatOptions> {
        self.state.with(|s| s.repeat.clone())
    }

    #[must_use]
    pub fn item_height(&self) -> Option<u32> {
        self.state.with(|s| s.item_height)
    }

    #[must_use]
    pub fn repeated_panels(&self) -> Vec<Rc<VizPanel>> {
        self.state.with(|s| s.repeated_panels.clone())
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&PanelItemState) + 'static) -> Subscription {
        self.state.subscribe(callback)
    }

    /// Flow geometry of the current repeat options.
    #[must_use]
    pub fn geometry(&self) -> FlowGeometry {
        self.state.with(Self::geometry_of)
    }

    fn geometry_of(state: &PanelItemState) -> FlowGeometry {
        let (direction, max_per_row) = state
            .repeat
            .as_ref()
            .map_or((RepeatDirection::default(), None), |r| {
                (r.direction, r.max_per_row)
            });
        FlowGeometry::new(direction, max_per_row, state.item_height)
    }

    /// Absolute grid rectangle of every repeated panel.
    #[must_use]
    pub fn clone_positions(&self) -> Vec<GridPos> {
        self.state.with(|s| Self::geometry_of(s).clone_positions(s.pos, s.repeated_panels.len()))
    }

    /// Whether the last cycle was skipped because the variable was loading.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.repeater.cycle.is_waiting()
    }

    #[must_use]
    pub fn phase(&self) -> RepeatPhase {
        self.repeater.cycle.phase()
    }

    fn update(&self, f: impl FnOnce(&mut PanelItemState)) {
        let mut next = self.state.get();
        f(&mut next);
        self.core.commit(&self.state, next);
    }

    /// Write state that must not be mistaken for a user resize.
    fn update_quiet(&self, f: impl FnOnce(&mut PanelItemState)) {
        let _phase = self.repeater.cycle.enter(RepeatPhase::Resizing);
        self.update(|s| {
            f(s);
            self.repeater.last_height.set(Some(s.pos.h));
        });
    }

    pub fn set_pos(&self, pos: GridPos) {
        if self.pos() != pos {
            self.update(|s| s.pos = pos);
        }
    }

    /// Move the item vertically by `delta` rows.
    pub fn shift(&self, delta: i64) {
        self.set_pos(self.pos().shifted(delta));
    }

    /// Swap the repeat template and re-run the cycle.
    pub fn set_template(&self, body: Rc<VizPanel>) {
        self.update_quiet(|s| s.body = body);
        self.repeater.cycle.reset();
        if self.is_active() {
            self.perform_repeat();
        }
    }

    /// Turn repetition on, or change its options.
    ///
    /// The current height becomes the clone height unless one is already set.
    pub fn set_repeat(&self, options: RepeatOptions) {
        let name = options.variable_name.clone();
        self.update_quiet(|s| {
            if s.item_height.is_none() {
                s.item_height = Some(s.pos.h);
            }
            s.repeat = Some(options);
        });
        self.repeater.cycle.reset();
        if let Some(dependency) = self.repeater.dependency.borrow().as_ref() {
            dependency.set_variable_names([name]);
        }
        if self.is_active() {
            self.perform_repeat();
        }
    }

    /// Turn repetition off, dropping every clone.
    ///
    /// The item shrinks back to one clone height; position and template are
    /// kept.
    pub fn remove_repeat(&self) {
        if self.repeat().is_none() {
            return;
        }
        self.update_quiet(|s| {
            s.repeat = None;
            s.repeated_panels.clear();
            if let Some(h) = s.item_height.take() {
                s.pos.h = h;
            }
        });
        self.repeater.cycle.reset();
        if let Some(dependency) = self.repeater.dependency.borrow().as_ref() {
            dependency.set_variable_names(Vec::<String>::new());
        }
        if let Some(grid) = find_ancestor::<GridLayout>(self) {
            grid.force_relayout();
        }
    }

    /// Unmounted copy for a row clone: keys suffixed with `suffix`, moved by
    /// `delta` rows.
    pub fn clone_for_row(&self, suffix: &str, delta: i64) -> Rc<Self> {
        let state = self.state.get();
        let body = state.body.clone_with_key(clone_key(&state.body.key(), suffix));
        let repeated_panels = state
            .repeated_panels
            .iter()
            .map(|panel| panel.clone_with_key(clone_key(&panel.key(), suffix)))
            .collect();
        Self::new(PanelItemState {
            key: clone_key(&state.key, suffix),
            pos: state.pos.shifted(delta),
            body,
            repeat: state.repeat.clone(),
            item_height: state.item_height,
            repeated_panels,
        })
    }

    fn waiting_for(&self, name: &str) -> bool {
        match self.repeater.dependency.borrow().as_ref() {
            Some(dependency) => dependency.has_unresolved_dependency(),
            None => lookup_variable(name, self).is_some_and(|v| v.is_loading()),
        }
    }

    /// Run one repeat cycle.
    ///
    /// Does nothing without repeat options, while another phase is in
    /// progress, while the variable is loading, or when the value list has
    /// not changed since the last cycle.
    pub fn perform_repeat(&self) {
        let Some(options) = self.repeat() else {
            return;
        };
        let cycle = &self.repeater.cycle;
        let Some(phase) = cycle.enter(RepeatPhase::Cycling) else {
            debug!(key = %self.key(), phase = ?cycle.phase(), "panel repeat rejected, busy");
            return;
        };

        if self.waiting_for(&options.variable_name) {
            cycle.set_waiting(true);
            return;
        }
        cycle.set_waiting(false);

        let (binding, values) = match resolve_repeat_variable(&options.variable_name, self) {
            Ok(variable) => {
                let values = variable.values();
                if cycle.is_unchanged(&values) {
                    debug!(key = %self.key(), "panel repeat skipped, values unchanged");
                    return;
                }
                cycle.record(values.clone());
                (
                    RepeatBinding::of(&variable),
                    with_placeholder(values, variable.has_all_value()),
                )
            }
            Err(RepeatError::VariableNotFound { name }) => {
                let values = RepeatValues {
                    values: vec![String::new()],
                    texts: vec![String::new()],
                };
                if cycle.is_unchanged(&values) {
                    return;
                }
                cycle.record(values.clone());
                (RepeatBinding::placeholder(&name), values)
            }
            Err(err) => {
                error!(key = %self.key(), %err, "panel repeat aborted");
                return;
            }
        };

        let started = Instant::now();
        let span = info_span!(
            "repeat.cycle",
            kind = "panel",
            key = %self.key(),
            variable = %binding.name,
            clones = values.len(),
            height = tracing::field::Empty,
            duration_us = tracing::field::Empty
        );
        let _span = span.enter();

        let mut next = self.state.get();
        let body = Rc::clone(&next.body);
        let template_key = body.key();
        next.repeated_panels = clone_per_value(&binding, &values, |slot| {
            let menu = if slot.index == 0 {
                body.menu()
            } else {
                PanelMenu::Repeated
            };
            body.repeat_clone(clone_key(&template_key, slot.index), slot.variables, menu)
        });

        let height = Self::geometry_of(&next).container_height(next.repeated_panels.len());
        let height_changed = height != next.pos.h;
        next.pos.h = height;
        self.repeater.last_height.set(Some(height));
        self.core.commit(&self.state, next);

        if height_changed && let Some(grid) = find_ancestor::<GridLayout>(self) {
            grid.force_relayout();
        }
        drop(phase);

        span.record("height", height);
        span.record("duration_us", started.elapsed().as_micros() as u64);
        if let Some(event) = SceneEvent::repeats_processed(self, RepeatKind::Panel) {
            self.publish_event(&event, true);
        }
    }

    /// Resize feedback: an outside height change rescales the clones.
    fn on_resized(&self) {
        let cycle = &self.repeater.cycle;
        if !cycle.is_idle() {
            return;
        }
        let state = self.state.get();
        if state.repeat.is_none() || self.repeater.last_height.get() == Some(state.pos.h) {
            return;
        }
        self.repeater.last_height.set(Some(state.pos.h));

        let count = state.repeated_panels.len();
        if count == 0 {
            return;
        }
        let item_height = Self::geometry_of(&state).item_height_for(state.pos.h, count);
        if state.item_height == Some(item_height) {
            return;
        }
        let Some(_phase) = cycle.enter(RepeatPhase::Resizing) else {
            return;
        };
        debug!(key = %state.key, height = state.pos.h, item_height, "panel resized");
        self.update(|s| s.item_height = Some(item_height));
    }
}

impl SceneObject for PanelItem {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn key(&self) -> String {
        self.state.with(|s| s.key.clone())
    }

    fn children(&self) -> Vec<NodeRef> {
        self.state.with(|s| s.children())
    }

    fn on_activate(&self) -> Option<Teardown> {
        let names: Vec<String> = self
            .repeat()
            .map(|r| r.variable_name)
            .into_iter()
            .collect();
        let me = self.me.clone();
        let dependency = VariableDependency::new(names, move || {
            if let Some(item) = me.upgrade() {
                item.perform_repeat();
            }
        });
        dependency.activate(self);
        *self.repeater.dependency.borrow_mut() = Some(dependency);

        let me = self.me.clone();
        let resize = self.state.subscribe(move |_| {
            if let Some(item) = me.upgrade() {
                item.on_resized();
            }
        });
        *self.repeater.resize.borrow_mut() = Some(resize);

        self.perform_repeat();

        let me = self.me.clone();
        Some(Box::new(move || {
            let Some(item) = me.upgrade() else {
                return;
            };
            if let Some(dependency) = item.repeater.dependency.borrow_mut().take() {
                dependency.deactivate();
            }
            item.repeater.resize.borrow_mut().take();
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for PanelItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.with(|s| {
            f.debug_struct("PanelItem")
                .field("key", &s.key)
                .field("pos", &s.pos)
                .field("repeat", &s.repeat)
                .field("repeated_panels", &s.repeated_panels.len())
                .finish_non_exhaustive()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashgrid_scene::{
        ALL_VARIABLE_TEXT, ALL_VARIABLE_VALUE, MultiValueState, MultiValueVariable, TextVariable,
        VariableOption,
    };

    fn repeated_item(options: RepeatOptions, item_height: u32) -> Rc<PanelItem> {
        let body = VizPanel::build("panel-1", "CPU $server", "timeseries");
        let item = PanelItem::build("grid-item-1", GridPos::new(0, 0, 24, item_height), body);
        item.set_repeat(options);
        item
    }

    fn grid_with(vars: Vec<Variable>, item: &Rc<PanelItem>) -> Rc<GridLayout> {
        let grid = GridLayout::with_variables("grid", VariableSet::new(vars), vec![Rc::clone(item).into()]);
        grid.activate();
        grid
    }

    fn keys(item: &PanelItem) -> Vec<String> {
        item.repeated_panels().iter().map(|p| p.key()).collect()
    }

    #[test]
    fn horizontal_cycle_sets_height_from_rows() {
        let server = MultiValueVariable::custom("server", &["1", "2", "3", "4", "5"]);
        let item = repeated_item(RepeatOptions::new("server").with_max_per_row(2), 10);
        let _grid = grid_with(vec![server.into()], &item);

        assert_eq!(item.repeated_panels().len(), 5);
        assert_eq!(item.pos().h, 30);
        assert_eq!(
            keys(&item),
            (0..5).map(|i| format!("panel-1-clone-{i}")).collect::<Vec<_>>()
        );
    }

    #[test]
    fn first_clone_keeps_authored_menu() {
        let server = MultiValueVariable::custom("server", &["a", "b", "c"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.into()], &item);

        let menus: Vec<PanelMenu> = item.repeated_panels().iter().map(|p| p.menu()).collect();
        assert_eq!(menus, vec![PanelMenu::Authored, PanelMenu::Repeated, PanelMenu::Repeated]);
        assert!(!PanelMenu::Repeated.actions().contains(&"edit"));
    }

    #[test]
    fn clones_interpolate_their_own_value() {
        let server = MultiValueVariable::custom("server", &["a", "b"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.into()], &item);

        let titles: Vec<String> = item
            .repeated_panels()
            .iter()
            .map(|p| p.interpolated_title())
            .collect();
        assert_eq!(titles, vec!["CPU a", "CPU b"]);
        assert_eq!(item.body().interpolated_title(), "CPU {a,b}");
    }

    #[test]
    fn vertical_height_is_count_times_item_height() {
        let server = MultiValueVariable::custom("server", &["a", "b", "c"]);
        let item = repeated_item(
            RepeatOptions::new("server").with_direction(RepeatDirection::Vertical),
            4,
        );
        let _grid = grid_with(vec![server.into()], &item);
        assert_eq!(item.pos().h, 12);
        assert_eq!(item.clone_positions()[2], GridPos::new(0, 8, 24, 4));
    }

    #[test]
    fn unchanged_values_do_not_notify() {
        let server = MultiValueVariable::custom("server", &["a", "b"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.clone().into()], &item);

        let version = item.version();
        item.perform_repeat();
        server.select(&["a", "b"]);
        assert_eq!(item.version(), version);
    }

    #[test]
    fn selection_change_reclones() {
        let server = MultiValueVariable::custom("server", &["1", "2", "3", "4", "5"]);
        let item = repeated_item(RepeatOptions::new("server").with_max_per_row(2), 10);
        let _grid = grid_with(vec![server.clone().into()], &item);

        server.select(&["1", "3"]);
        let locals: Vec<(String, String)> = item
            .repeated_panels()
            .iter()
            .filter_map(|p| p.local_value("server"))
            .map(|l| (l.value, l.text))
            .collect();
        assert_eq!(locals, vec![("1".into(), "1".into()), ("3".into(), "3".into())]);
        assert_eq!(item.pos().h, 10);
    }

    #[test]
    fn waits_while_loading() {
        let server = MultiValueVariable::custom("server", &["a", "b"]);
        server.set_loading(true);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.clone().into()], &item);

        assert!(item.is_waiting());
        assert!(item.repeated_panels().is_empty());

        server.resolve(vec![VariableOption::new("a", "a"), VariableOption::new("b", "b")]);
        assert!(!item.is_waiting());
        assert_eq!(item.repeated_panels().len(), 2);
    }

    #[test]
    fn missing_variable_renders_placeholder() {
        let item = repeated_item(RepeatOptions::new("ghost"), 6);
        let _grid = grid_with(Vec::new(), &item);

        let panels = item.repeated_panels();
        assert_eq!(panels.len(), 1);
        let local = panels[0].local_value("ghost").expect("placeholder binding");
        assert_eq!(local.value, "");
        assert_eq!(item.pos().h, 6);
    }

    #[test]
    fn text_variable_aborts_without_changes() {
        let item = repeated_item(RepeatOptions::new("note"), 10);
        let _grid = grid_with(vec![TextVariable::new("note", "x").into()], &item);
        assert!(item.repeated_panels().is_empty());
        assert_eq!(item.phase(), RepeatPhase::Idle);
    }

    #[test]
    fn empty_all_selection_yields_one_all_clone() {
        let server = MultiValueVariable::new(MultiValueState {
            name: "server".into(),
            value: vec![ALL_VARIABLE_VALUE.into()],
            text: vec![ALL_VARIABLE_TEXT.into()],
            include_all: true,
            is_multi: true,
            ..MultiValueState::default()
        });
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.into()], &item);

        let panels = item.repeated_panels();
        assert_eq!(panels.len(), 1);
        let local = panels[0].local_value("server").expect("binding");
        assert_eq!(local.text, ALL_VARIABLE_TEXT);
    }

    #[test]
    fn resize_back_computes_item_height_without_recloning() {
        let server = MultiValueVariable::custom("server", &["1", "2", "3", "4", "5"]);
        let item = repeated_item(RepeatOptions::new("server").with_max_per_row(2), 10);
        let _grid = grid_with(vec![server.into()], &item);
        let clones_before = item.repeated_panels();

        let pos = item.pos();
        item.set_pos(pos.with_height(31));

        assert_eq!(item.item_height(), Some(11));
        assert_eq!(item.pos().h, 31);
        let clones_after = item.repeated_panels();
        assert!(Rc::ptr_eq(&clones_before[0], &clones_after[0]));
        assert_eq!(item.phase(), RepeatPhase::Idle);
    }

    #[test]
    fn moving_does_not_touch_item_height() {
        let server = MultiValueVariable::custom("server", &["1", "2"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.into()], &item);
        item.shift(3);
        assert_eq!(item.item_height(), Some(10));
    }

    #[test]
    fn remove_repeat_keeps_template_and_position() {
        let server = MultiValueVariable::custom("server", &["1", "2", "3", "4", "5"]);
        let item = repeated_item(RepeatOptions::new("server").with_max_per_row(2), 10);
        let _grid = grid_with(vec![server.clone().into()], &item);
        let body = item.body();

        item.remove_repeat();
        assert!(item.repeated_panels().is_empty());
        assert!(item.repeat().is_none());
        assert_eq!(item.pos(), GridPos::new(0, 0, 24, 10));
        assert!(Rc::ptr_eq(&body, &item.body()));

        server.select(&["1"]);
        assert!(item.repeated_panels().is_empty());
    }

    #[test]
    fn set_template_forces_a_cycle() {
        let server = MultiValueVariable::custom("server", &["a", "b"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.into()], &item);

        item.set_template(VizPanel::build("panel-1", "Memory $server", "stat"));
        let titles: Vec<String> = item
            .repeated_panels()
            .iter()
            .map(|p| p.interpolated_title())
            .collect();
        assert_eq!(titles, vec!["Memory a", "Memory b"]);
    }

    #[test]
    fn repeats_processed_bubbles_to_grid() {
        let server = MultiValueVariable::custom("server", &["a"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let grid = GridLayout::with_variables(
            "grid",
            VariableSet::new(vec![server.clone().into()]),
            vec![Rc::clone(&item).into()],
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_grid = Rc::clone(&seen);
        let _sub = grid.core().subscribe_events(move |event| {
            seen_grid.borrow_mut().push(event.key().to_string());
        });

        grid.activate();
        server.select(&["a", "b"]);
        assert_eq!(*seen.borrow(), vec!["grid-item-1", "grid-item-1"]);
    }

    #[test]
    fn deactivated_item_stops_repeating() {
        let server = MultiValueVariable::custom("server", &["a", "b"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let grid = grid_with(vec![server.clone().into()], &item);
        grid.deactivate();
        server.select(&["a"]);
        assert_eq!(item.repeated_panels().len(), 2);
    }

    #[test]
    fn clone_for_row_suffixes_every_key() {
        let server = MultiValueVariable::custom("server", &["a", "b"]);
        let item = repeated_item(RepeatOptions::new("server"), 10);
        let _grid = grid_with(vec![server.into()], &item);

        let copy = item.clone_for_row("B", 6);
        assert_eq!(copy.key(), "grid-item-1-clone-B");
        assert_eq!(copy.body().key(), "panel-1-clone-B");
        assert_eq!(copy.pos().y, item.pos().y + 6);
        assert_eq!(
            keys(&copy),
            vec!["panel-1-clone-0-clone-B", "panel-1-clone-1-clone-B"]
        );
    }
}
