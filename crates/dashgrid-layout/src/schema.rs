#![forbid(unsafe_code)]

//! Persisted panel list.
//!
//! The saved form of a grid is a flat list of [`PanelModel`]s. A row model
//! owns the panel models that follow it up to the next row; a collapsed row
//! keeps its panels nested under `panels` instead. Repeat clones are never
//! saved: they are rebuilt from the template by the next cycle.

use std::fmt;
use std::rc::Rc;

use dashgrid_core::{GRID_COLUMN_COUNT, GridPos};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::geometry::{DEFAULT_ITEM_HEIGHT, DEFAULT_MAX_PER_ROW, RepeatDirection};
use crate::grid::{GridChild, panel_id_from_key};
use crate::panel::{PanelItem, PanelItemState, PanelMenu, RepeatOptions, VizPanel, VizPanelState};
use crate::repeat::is_clone_key;
use crate::row::{GridRow, GridRowState, RowActions, RowBehavior, RowRepeater};

/// Plugin id of row models.
pub const ROW_PANEL_TYPE: &str = "row";

// =========================================================================
// Schema types
// =========================================================================

/// One entry of the persisted panel list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelModel {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    pub grid_pos: GridPos,
    /// Name of the repeat variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_direction: Option<RepeatDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_row: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
    /// Panels of a collapsed row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panels: Option<Vec<PanelModel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    /// Set on clones materialised by older writers; such entries are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_panel_id: Option<u32>,
}

impl PanelModel {
    #[must_use]
    pub fn is_row(&self) -> bool {
        self.kind == ROW_PANEL_TYPE
    }
}

/// Fallbacks for repeat settings a model leaves unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatDefaults {
    pub max_per_row: u32,
    pub item_height: u32,
    pub direction: RepeatDirection,
}

impl Default for RepeatDefaults {
    fn default() -> Self {
        Self {
            max_per_row: DEFAULT_MAX_PER_ROW,
            item_height: DEFAULT_ITEM_HEIGHT,
            direction: RepeatDirection::default(),
        }
    }
}

// =========================================================================
// Validation errors
// =========================================================================

/// A panel list that cannot be turned into a grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two entries share an id.
    DuplicatePanelId { id: u32 },
    /// A row appears inside another row's `panels`.
    NestedRow { id: u32 },
    /// The grid position does not fit the grid.
    InvalidGridPos { id: u32, reason: &'static str },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePanelId { id } => write!(f, "duplicate panel id {id}"),
            Self::NestedRow { id } => write!(f, "row {id} is nested inside another row"),
            Self::InvalidGridPos { id, reason } => {
                write!(f, "panel {id} has an invalid grid position: {reason}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

fn check_pos(model: &PanelModel) -> Result<(), SchemaError> {
    let pos = model.grid_pos;
    let reason = if pos.w == 0 {
        "zero width"
    } else if pos.right() > GRID_COLUMN_COUNT {
        "wider than the grid"
    } else {
        return Ok(());
    };
    Err(SchemaError::InvalidGridPos {
        id: model.id,
        reason,
    })
}

// =========================================================================
// Load
// =========================================================================

fn build_panel_item(model: &PanelModel, defaults: &RepeatDefaults) -> Rc<PanelItem> {
    let body = VizPanel::new(VizPanelState {
        key: format!("panel-{}", model.id),
        title: model.title.clone(),
        plugin_id: model.kind.clone(),
        options: model.options.clone().unwrap_or(Value::Null),
        menu: PanelMenu::Authored,
        variables: None,
    });
    let repeat = model.repeat.as_ref().map(|name| RepeatOptions {
        variable_name: name.clone(),
        direction: model.repeat_direction.unwrap_or(defaults.direction),
        max_per_row: Some(model.max_per_row.unwrap_or(defaults.max_per_row)),
    });
    let item_height = repeat.as_ref().map(|_| match model.grid_pos.h {
        0 => defaults.item_height,
        h => h,
    });
    PanelItem::new(PanelItemState {
        key: format!("grid-item-{}", model.id),
        pos: model.grid_pos,
        body,
        repeat,
        item_height,
        repeated_panels: Vec::new(),
    })
}

fn build_row(model: &PanelModel, children: Vec<Rc<PanelItem>>) -> Rc<GridRow> {
    let behaviors = model
        .repeat
        .as_deref()
        .map(|name| RowBehavior::Repeat(RowRepeater::new(name)))
        .into_iter()
        .collect();
    GridRow::new(GridRowState {
        key: format!("panel-{}", model.id),
        title: model.title.clone(),
        pos: GridPos::row_header(model.grid_pos.y),
        collapsed: model.collapsed.unwrap_or(false),
        children,
        variables: None,
        behaviors,
        actions: Some(RowActions::default()),
    })
}

/// Turn a persisted panel list into grid children.
///
/// Panels following an expanded row belong to it until the next row. A
/// collapsed row takes its nested `panels` and ends the current row.
pub fn build_children(
    models: &[PanelModel],
    defaults: &RepeatDefaults,
) -> Result<Vec<GridChild>, SchemaError> {
    let mut seen = FxHashSet::default();
    let mut children = Vec::new();
    let mut open_row: Option<(&PanelModel, Vec<Rc<PanelItem>>)> = None;
    let mut skipped = 0usize;

    for model in models {
        if model.repeat_panel_id.is_some() {
            skipped += 1;
            continue;
        }
        if !seen.insert(model.id) {
            return Err(SchemaError::DuplicatePanelId { id: model.id });
        }

        if !model.is_row() {
            check_pos(model)?;
            let item = build_panel_item(model, defaults);
            match open_row.as_mut() {
                Some((_, items)) => items.push(item),
                None => children.push(GridChild::Panel(item)),
            }
            continue;
        }

        if let Some((row, items)) = open_row.take() {
            children.push(GridChild::Row(build_row(row, items)));
        }
        if model.collapsed.unwrap_or(false) {
            let mut items = Vec::new();
            for nested in model.panels.iter().flatten() {
                if nested.is_row() {
                    return Err(SchemaError::NestedRow { id: nested.id });
                }
                if !seen.insert(nested.id) {
                    return Err(SchemaError::DuplicatePanelId { id: nested.id });
                }
                check_pos(nested)?;
                items.push(build_panel_item(nested, defaults));
            }
            children.push(GridChild::Row(build_row(model, items)));
        } else {
            open_row = Some((model, Vec::new()));
        }
    }
    if let Some((row, items)) = open_row {
        children.push(GridChild::Row(build_row(row, items)));
    }

    debug!(children = children.len(), skipped, "panel list loaded");
    Ok(children)
}

// =========================================================================
// Save
// =========================================================================

fn save_panel_item(item: &PanelItem) -> PanelModel {
    let state = item.state();
    let body = state.body.state();
    let mut grid_pos = state.pos;
    if state.repeat.is_some()
        && let Some(h) = state.item_height
    {
        grid_pos.h = h;
    }
    PanelModel {
        id: panel_id_from_key(&body.key).unwrap_or_default(),
        kind: body.plugin_id,
        title: body.title,
        grid_pos,
        repeat: state.repeat.as_ref().map(|r| r.variable_name.clone()),
        repeat_direction: state.repeat.as_ref().map(|r| r.direction),
        max_per_row: state.repeat.as_ref().and_then(|r| match r.direction {
            RepeatDirection::Horizontal => r.max_per_row,
            RepeatDirection::Vertical => None,
        }),
        options: match body.options {
            Value::Null => None,
            options => Some(options),
        },
        ..PanelModel::default()
    }
}

/// Write grid children back as a flat panel list, skipping every clone.
#[must_use]
pub fn save_panels(children: &[GridChild]) -> Vec<PanelModel> {
    let mut models = Vec::new();
    for child in children {
        if is_clone_key(&child.key()) {
            continue;
        }
        match child {
            GridChild::Panel(item) => models.push(save_panel_item(item)),
            GridChild::Row(row) => {
                let state = row.state();
                let items: Vec<PanelModel> = state
                    .children
                    .iter()
                    .map(|item| save_panel_item(item))
                    .collect();
                let mut model = PanelModel {
                    id: panel_id_from_key(&state.key).unwrap_or_default(),
                    kind: ROW_PANEL_TYPE.to_string(),
                    title: state.title,
                    grid_pos: state.pos,
                    repeat: row.repeater().map(|r| r.variable_name()),
                    collapsed: Some(state.collapsed),
                    ..PanelModel::default()
                };
                if state.collapsed {
                    model.panels = Some(items);
                    models.push(model);
                } else {
                    model.panels = Some(Vec::new());
                    models.push(model);
                    models.extend(items);
                }
            }
        }
    }
    models
}
