#![forbid(unsafe_code)]

//! dashgrid public facade crate.
//!
//! Loads a dashboard document into a live scene, keeps its repeated panels
//! and rows in sync with the dashboard variables, and saves it back. The
//! engine lives in the re-exported internal crates; this crate adds the
//! [`Dashboard`] root, [`DashboardConfig`] and logging setup.
//!
//! ```rust,ignore
//! let config = DashboardConfig::from_file("dashgrid.toml")?;
//! dashgrid::logging::init(&config.logging)?;
//! let dashboard = Dashboard::from_json(&json, &config)?;
//! dashboard.activate();
//! ```

pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;

pub use config::{DashboardConfig, GridConfig, LogFormat, LoggingConfig, RepeatConfig};
pub use dashboard::{
    BODY_GRID_KEY, CurrentModel, Dashboard, DashboardModel, OneOrMany, OptionModel, Templating,
    VariableKind, VariableModel,
};
pub use error::{DashboardError, Result};

// --- Core re-exports -------------------------------------------------------

pub use dashgrid_core::{BatchScope, GRID_COLUMN_COUNT, GridPos, Observable, Subscription};

// --- Scene re-exports ------------------------------------------------------

pub use dashgrid_scene::{
    ALL_VARIABLE_TEXT, ALL_VARIABLE_VALUE, LocalValueVariable, MultiValueState,
    MultiValueVariable, RepeatKind, RepeatValues, SceneEvent, SceneNodeExt, SceneObject,
    TextVariable, Variable, VariableOption, VariableSet,
};

// --- Layout re-exports -----------------------------------------------------

pub use dashgrid_layout::{
    GridChild, GridLayout, GridRow, PanelItem, PanelMenu, PanelModel, RepeatDirection,
    RepeatOptions, RowRepeater, SchemaError, VizPanel,
};

/// Everything needed to load and drive a dashboard.
pub mod prelude {
    pub use crate::{
        Dashboard, DashboardConfig, DashboardError, GridPos, MultiValueVariable, RepeatDirection,
        RepeatOptions, SceneEvent, SceneNodeExt, SceneObject, Variable,
    };
}
