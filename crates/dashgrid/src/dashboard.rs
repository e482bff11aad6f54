#![forbid(unsafe_code)]

//! Dashboard root node and its save model.
//!
//! # Design
//!
//! A [`Dashboard`] owns the dashboard-level variables and a single body
//! [`GridLayout`]. Repeat engines below it resolve their variables by walking
//! up to this node, and their `RepeatsProcessed` events bubble up to it.
//!
//! The save model mirrors the persisted dashboard document: `templating.list`
//! for variables and a flat `panels` list for the grid. Saving writes the
//! live variable selections back into the variable models and skips every
//! repeat clone.
//!
//! # Failure Modes
//!
//! Loading fails on malformed JSON, an invalid config, a panel wider than
//! the configured grid, or a panel list the layout loader rejects. Nothing
//! is mounted in that case.

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use dashgrid_core::Subscription;
use dashgrid_layout::{GridLayout, PanelModel, VizPanel, build_children, save_panels};
use dashgrid_scene::{
    MultiValueState, MultiValueVariable, NodeCore, NodeRef, SceneEvent, SceneObject, TextVariable,
    Variable, VariableOption, VariableSet, mount,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DashboardConfig;
use crate::error::{DashboardError, Result};

/// Key of the body grid of every dashboard.
pub const BODY_GRID_KEY: &str = "grid";

// ---------------------------------------------------------------------------
// Save model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardModel {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub templating: Templating,
    #[serde(default)]
    pub panels: Vec<PanelModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Templating {
    #[serde(default)]
    pub list: Vec<VariableModel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Query,
    Custom,
    Textbox,
    Constant,
}

impl VariableKind {
    /// Whether variables of this kind hold a list of selected values.
    #[must_use]
    pub fn is_multi_value(self) -> bool {
        matches!(self, Self::Query | Self::Custom)
    }
}

/// A saved selection: a single string, or a list for multi-select variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::One(String::new())
    }
}

impl OneOrMany {
    /// The selection as a list; an empty string means nothing selected.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(value) if value.is_empty() => Vec::new(),
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }

    fn from_vec(mut values: Vec<String>, multi: bool) -> Self {
        if multi {
            Self::Many(values)
        } else if values.is_empty() {
            Self::default()
        } else {
            Self::One(values.swap_remove(0))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurrentModel {
    #[serde(default)]
    pub text: OneOrMany,
    #[serde(default)]
    pub value: OneOrMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionModel {
    pub text: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableModel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    /// Comma-separated values of a custom variable, or the value of a
    /// constant.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub options: Vec<OptionModel>,
    #[serde(default)]
    pub current: CurrentModel,
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub include_all: bool,
}

fn build_variable(model: &VariableModel) -> Variable {
    let current = model.current.value.to_vec();
    if !model.kind.is_multi_value() {
        let value = current
            .into_iter()
            .next()
            .unwrap_or_else(|| model.query.clone());
        return TextVariable::new(&model.name, &value).into();
    }

    let mut options: Vec<VariableOption> = model
        .options
        .iter()
        .map(|o| VariableOption::new(o.value.as_str(), o.text.as_str()))
        .collect();
    if options.is_empty() && model.kind == VariableKind::Custom {
        options = model
            .query
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| VariableOption::new(v, v))
            .collect();
    }
    let variable = MultiValueVariable::new(MultiValueState {
        name: model.name.clone(),
        options,
        value: Vec::new(),
        text: Vec::new(),
        include_all: model.include_all,
        is_multi: model.multi,
        loading: false,
    });
    if !current.is_empty() {
        variable.select(&current);
    }
    variable.into()
}

fn save_variable(model: &VariableModel, live: Option<Variable>) -> VariableModel {
    let mut model = model.clone();
    match live {
        Some(Variable::Multi(variable)) => {
            let state = variable.state();
            model.options = state
                .options
                .iter()
                .map(|o| OptionModel {
                    text: o.text.clone(),
                    value: o.value.clone(),
                })
                .collect();
            model.current = CurrentModel {
                text: OneOrMany::from_vec(state.text, state.is_multi),
                value: OneOrMany::from_vec(state.value, state.is_multi),
            };
        }
        Some(Variable::Text(variable)) => {
            let value = variable.value();
            model.current = CurrentModel {
                text: OneOrMany::One(value.clone()),
                value: OneOrMany::One(value),
            };
        }
        Some(Variable::Local(_)) | None => {}
    }
    model
}

fn check_columns(panels: &[PanelModel], column_count: u32) -> Result<()> {
    for panel in panels {
        if panel.grid_pos.right() > column_count {
            return Err(DashboardError::PanelOutOfBounds {
                id: panel.id,
                column_count,
            });
        }
        if let Some(nested) = &panel.panels {
            check_columns(nested, column_count)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Root of a dashboard scene.
pub struct Dashboard {
    core: NodeCore,
    uid: String,
    title: String,
    variables: VariableSet,
    variable_models: Vec<VariableModel>,
    body: Rc<GridLayout>,
}

impl Dashboard {
    /// Build an inactive dashboard from its save model.
    pub fn from_model(model: DashboardModel, config: &DashboardConfig) -> Result<Rc<Self>> {
        config.ensure_valid()?;
        check_columns(&model.panels, config.grid.column_count)?;

        let children = build_children(&model.panels, &config.repeat_defaults())?;
        let body = GridLayout::new(BODY_GRID_KEY, children);
        if config.grid.compact_on_load {
            body.force_relayout();
        }
        let variables = VariableSet::new(model.templating.list.iter().map(build_variable).collect());

        info!(
            uid = %model.uid,
            panels = model.panels.len(),
            variables = variables.len(),
            "dashboard loaded"
        );
        Ok(mount(Self {
            core: NodeCore::new(),
            uid: model.uid,
            title: model.title,
            variables,
            variable_models: model.templating.list,
            body,
        }))
    }

    /// Parse and build a dashboard from its JSON document.
    pub fn from_json(json: &str, config: &DashboardConfig) -> Result<Rc<Self>> {
        let model: DashboardModel = serde_json::from_str(json)?;
        Self::from_model(model, config)
    }

    pub fn from_json_file(path: impl AsRef<Path>, config: &DashboardConfig) -> Result<Rc<Self>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content, config)
    }

    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn body(&self) -> Rc<GridLayout> {
        Rc::clone(&self.body)
    }

    /// Dashboard-level variable named `name`.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<Variable> {
        self.variables.get(name)
    }

    /// Any panel in the body grid, template or clone.
    #[must_use]
    pub fn find_panel(&self, key: &str) -> Option<Rc<VizPanel>> {
        self.body.find_panel(key)
    }

    /// Run `callback` for every completed repeat cycle anywhere below this
    /// dashboard.
    pub fn subscribe_repeats_processed(
        &self,
        callback: impl Fn(&SceneEvent) + 'static,
    ) -> Subscription {
        self.core.subscribe_events(move |event| match event {
            SceneEvent::RepeatsProcessed { .. } => callback(event),
        })
    }

    /// Current state as a save model, repeat clones excluded.
    #[must_use]
    pub fn to_model(&self) -> DashboardModel {
        DashboardModel {
            uid: self.uid.clone(),
            title: self.title.clone(),
            templating: Templating {
                list: self
                    .variable_models
                    .iter()
                    .map(|m| save_variable(m, self.variables.get(&m.name)))
                    .collect(),
            },
            panels: save_panels(&self.body.children()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_model())?)
    }
}

impl SceneObject for Dashboard {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn key(&self) -> String {
        self.uid.clone()
    }

    fn children(&self) -> Vec<NodeRef> {
        vec![Rc::clone(&self.body) as NodeRef]
    }

    fn variables(&self) -> Option<VariableSet> {
        Some(self.variables.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("uid", &self.uid)
            .field("title", &self.title)
            .field("variables", &self.variables.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashgrid_scene::{ALL_VARIABLE_VALUE, SceneNodeExt};

    fn model(kind: VariableKind) -> VariableModel {
        VariableModel {
            name: "server".into(),
            kind,
            query: "a, b,c".into(),
            options: Vec::new(),
            current: CurrentModel::default(),
            multi: true,
            include_all: true,
        }
    }

    #[test]
    fn custom_variables_take_options_from_query() {
        let Variable::Multi(variable) = build_variable(&model(VariableKind::Custom)) else {
            panic!("custom variables are multi-value");
        };
        let values: Vec<String> = variable.state().options.into_iter().map(|o| o.value).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
        assert!(variable.values().is_empty());
    }

    #[test]
    fn current_selection_is_applied_with_texts() {
        let mut m = model(VariableKind::Query);
        m.options = vec![OptionModel {
            text: "Alpha".into(),
            value: "a".into(),
        }];
        m.current.value = OneOrMany::Many(vec!["a".into()]);
        let Variable::Multi(variable) = build_variable(&m) else {
            panic!("query variables are multi-value");
        };
        assert_eq!(variable.values().texts, vec!["Alpha"]);
    }

    #[test]
    fn textbox_and_constant_become_text_variables() {
        let mut m = model(VariableKind::Constant);
        m.query = "prod".into();
        let Variable::Text(text) = build_variable(&m) else {
            panic!("constants are text variables");
        };
        assert_eq!(text.value(), "prod");

        let mut m = model(VariableKind::Textbox);
        m.current.value = OneOrMany::One("typed".into());
        let Variable::Text(text) = build_variable(&m) else {
            panic!("textboxes are text variables");
        };
        assert_eq!(text.value(), "typed");
    }

    #[test]
    fn saving_writes_live_selection() {
        let m = model(VariableKind::Custom);
        let live = build_variable(&m);
        if let Variable::Multi(variable) = &live {
            variable.select(&[ALL_VARIABLE_VALUE]);
        }
        let saved = save_variable(&m, Some(live));
        assert_eq!(saved.current.value, OneOrMany::Many(vec![ALL_VARIABLE_VALUE.into()]));
        assert_eq!(saved.current.text, OneOrMany::Many(vec!["All".into()]));
        assert_eq!(saved.options.len(), 3);
    }

    #[test]
    fn selection_shape_follows_multi_flag() {
        assert_eq!(
            OneOrMany::from_vec(vec!["x".into()], false),
            OneOrMany::One("x".into())
        );
        assert_eq!(OneOrMany::from_vec(Vec::new(), false), OneOrMany::default());
        assert_eq!(OneOrMany::One(String::new()).to_vec(), Vec::<String>::new());
        let parsed: CurrentModel =
            serde_json::from_str(r#"{"text": "A", "value": ["a", "b"]}"#).expect("parses");
        assert_eq!(parsed.value.to_vec(), vec!["a", "b"]);
    }

    #[test]
    fn dashboard_parents_its_grid() {
        let dashboard = Dashboard::from_json(
            r#"{"uid": "d1", "title": "Hosts", "panels": []}"#,
            &DashboardConfig::default(),
        )
        .expect("loads");
        assert_eq!(dashboard.key(), "d1");
        let parent = dashboard.body().parent().expect("grid is parented");
        assert_eq!(parent.key(), "d1");
        assert_eq!(dashboard.to_model().panels, Vec::new());
    }

    #[test]
    fn wide_panels_are_rejected_by_column_count() {
        let mut config = DashboardConfig::default();
        config.grid.column_count = 12;
        let err = Dashboard::from_json(
            r#"{"uid": "d1", "panels": [
                {"id": 1, "type": "stat", "gridPos": {"x": 6, "y": 0, "w": 12, "h": 4}}
            ]}"#,
            &config,
        )
        .expect_err("too wide");
        assert!(matches!(
            err,
            DashboardError::PanelOutOfBounds { id: 1, column_count: 12 }
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_loading() {
        let mut config = DashboardConfig::default();
        config.repeat.item_height = 0;
        let err = Dashboard::from_json("{}", &config).expect_err("invalid config");
        assert!(matches!(err, DashboardError::InvalidConfig(_)));
    }
}
