#![forbid(unsafe_code)]

use dashgrid_layout::SchemaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid panel list: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("invalid log filter `{filter}`: {message}")]
    LogFilter { filter: String, message: String },

    #[error("panel {id} does not fit in {column_count} columns")]
    PanelOutOfBounds { id: u32, column_count: u32 },
}
