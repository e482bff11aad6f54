#![forbid(unsafe_code)]

//! Runtime configuration for dashboards.
//!
//! A single [`DashboardConfig`] groups the repeat fallbacks, grid options and
//! logging setup. It loads from TOML or JSON; every field has a default, so a
//! partial file only overrides what it names.
//!
//! ```toml
//! [repeat]
//! max_per_row = 3
//! direction = "v"
//!
//! [logging]
//! format = "json"
//! filter = "dashgrid_layout=debug"
//! ```
//!
//! # Defaults
//!
//! `DashboardConfig::default()` reproduces the engine constants, so loading
//! a dashboard with the default config behaves like the layout crate used
//! directly.

use std::path::Path;

use dashgrid_core::GRID_COLUMN_COUNT;
use dashgrid_layout::{DEFAULT_ITEM_HEIGHT, DEFAULT_MAX_PER_ROW, RepeatDefaults, RepeatDirection};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{DashboardError, Result};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub repeat: RepeatConfig,
    pub grid: GridConfig,
    pub logging: LoggingConfig,
}

impl DashboardConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Load from a file, choosing the format by extension (`.json`, else
    /// TOML).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// Check every parameter. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.repeat.max_per_row == 0 {
            errors.push("repeat.max_per_row must be > 0".into());
        }
        if self.repeat.item_height == 0 {
            errors.push("repeat.item_height must be > 0".into());
        }

        if self.grid.column_count == 0 || self.grid.column_count > GRID_COLUMN_COUNT {
            errors.push(format!(
                "grid.column_count must be in 1..={GRID_COLUMN_COUNT}, got {}",
                self.grid.column_count
            ));
        }

        if let Err(err) = EnvFilter::try_new(&self.logging.filter) {
            errors.push(format!(
                "logging.filter `{}` is not a valid directive: {err}",
                self.logging.filter
            ));
        }

        errors
    }

    /// [`Self::validate`] as a `Result`.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DashboardError::InvalidConfig(errors))
        }
    }

    /// Fallbacks handed to the panel list loader.
    #[must_use]
    pub fn repeat_defaults(&self) -> RepeatDefaults {
        RepeatDefaults {
            max_per_row: self.repeat.max_per_row,
            item_height: self.repeat.item_height,
            direction: self.repeat.direction,
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Fallbacks for repeat settings a panel leaves unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatConfig {
    pub max_per_row: u32,
    pub item_height: u32,
    pub direction: RepeatDirection,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            max_per_row: DEFAULT_MAX_PER_ROW,
            item_height: DEFAULT_ITEM_HEIGHT,
            direction: RepeatDirection::Horizontal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Width of the grid; panels reaching past it are rejected on load.
    pub column_count: u32,
    /// Compact the layout once after loading, before activation.
    pub compact_on_load: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            column_count: GRID_COLUMN_COUNT,
            compact_on_load: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `dashgrid_layout=debug`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plain,
            filter: "info".into(),
        }
    }
}
