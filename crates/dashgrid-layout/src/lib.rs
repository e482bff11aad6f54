#![forbid(unsafe_code)]

//! Grid layout and repeat engine for dashgrid.
//!
//! - [`GridLayout`]: sole writer of a grid's ordered children.
//! - [`PanelItem`]: grid item hosting a template panel, optionally repeated
//!   once per value of a multi-value variable.
//! - [`GridRow`] with [`RowRepeater`]: repeats a whole row and cascades the
//!   shift to every sibling below it.
//! - [`schema`]: persisted panel list load/save.

pub mod geometry;
pub mod grid;
pub mod panel;
pub mod repeat;
pub mod row;
pub mod schema;

pub use geometry::{
    DEFAULT_ITEM_HEIGHT, DEFAULT_MAX_PER_ROW, FlowGeometry, LayoutBlock, RepeatDirection,
    RepeatGeometry, RowStackGeometry, compact_blocks, compact_vertical,
};
pub use grid::{GridChild, GridLayout, GridLayoutState, panel_id_from_key};
pub use panel::{PanelItem, PanelItemState, PanelMenu, RepeatOptions, VizPanel, VizPanelState};
pub use repeat::{
    CLONE_INFIX, CloneSlot, NO_VALUE_TEXT, PhaseGuard, RepeatBinding, RepeatCycle, RepeatError,
    RepeatPhase, clone_key, clone_per_value, is_clone_key, is_clone_of, resolve_repeat_variable,
    with_placeholder,
};
pub use row::{GridRow, GridRowState, RowActions, RowBehavior, RowRepeater};
pub use schema::{
    PanelModel, ROW_PANEL_TYPE, RepeatDefaults, SchemaError, build_children, save_panels,
};
