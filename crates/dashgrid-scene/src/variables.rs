#![forbid(unsafe_code)]

//! Dashboard variables and scoped lookup.
//!
//! Variables are cheap handles: cloning a [`MultiValueVariable`] or
//! [`TextVariable`] shares the same underlying observable state.
//! [`LocalValueVariable`] is an immutable override bound to exactly one
//! value; repeat clones carry one in their [`VariableSet`] so `$name`
//! resolves to the clone's own value inside its subtree.

use dashgrid_core::{Observable, Subscription};

use crate::node::SceneObject;

/// Selection value meaning "every option".
pub const ALL_VARIABLE_VALUE: &str = "$__all";

/// Display text of [`ALL_VARIABLE_VALUE`].
pub const ALL_VARIABLE_TEXT: &str = "All";

/// One selectable option of a multi-value variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableOption {
    pub value: String,
    pub text: String,
}

impl VariableOption {
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
        }
    }
}

/// Parallel value and text lists of a resolved variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepeatValues {
    pub values: Vec<String>,
    pub texts: Vec<String>,
}

impl RepeatValues {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(value, text)` pairs; a missing text falls back to the value.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().enumerate().map(|(i, value)| {
            let text = self.texts.get(i).unwrap_or(value);
            (value.as_str(), text.as_str())
        })
    }

    /// Drop repeated values, keeping the first occurrence and its text.
    #[must_use]
    pub fn deduplicated(self) -> Self {
        let mut out = Self::default();
        for (i, value) in self.values.into_iter().enumerate() {
            if out.values.contains(&value) {
                continue;
            }
            out.texts
                .push(self.texts.get(i).cloned().unwrap_or_else(|| value.clone()));
            out.values.push(value);
        }
        out
    }
}

/// State of a multi-value variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiValueState {
    pub name: String,
    pub options: Vec<VariableOption>,
    /// Current selection. May hold [`ALL_VARIABLE_VALUE`].
    pub value: Vec<String>,
    pub text: Vec<String>,
    pub include_all: bool,
    pub is_multi: bool,
    /// Set while the options are being resolved by an external source.
    pub loading: bool,
}

fn unique_in_order(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn texts_for(options: &[VariableOption], values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| {
            if value == ALL_VARIABLE_VALUE {
                return ALL_VARIABLE_TEXT.to_string();
            }
            options
                .iter()
                .find(|o| &o.value == value)
                .map_or_else(|| value.clone(), |o| o.text.clone())
        })
        .collect()
}

/// Variable whose selection is an ordered list of values.
#[derive(Debug, Clone)]
pub struct MultiValueVariable {
    state: Observable<MultiValueState>,
}

impl MultiValueVariable {
    #[must_use]
    pub fn new(state: MultiValueState) -> Self {
        Self {
            state: Observable::new(state),
        }
    }

    /// A multi-select custom variable with every value selected.
    #[must_use]
    pub fn custom(name: &str, values: &[&str]) -> Self {
        let options: Vec<VariableOption> =
            values.iter().map(|v| VariableOption::new(*v, *v)).collect();
        let value: Vec<String> = values.iter().map(|v| (*v).to_string()).collect();
        Self::new(MultiValueState {
            name: name.to_string(),
            text: value.clone(),
            value,
            options,
            include_all: false,
            is_multi: true,
            loading: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state.with(|s| s.name.clone())
    }

    #[must_use]
    pub fn state(&self) -> MultiValueState {
        self.state.get()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    /// The selected values, with the all sentinel expanded to every option.
    /// Each value appears once.
    #[must_use]
    pub fn values(&self) -> RepeatValues {
        let values = self.state.with(|s| {
            if s.value.iter().any(|v| v == ALL_VARIABLE_VALUE) {
                RepeatValues {
                    values: s.options.iter().map(|o| o.value.clone()).collect(),
                    texts: s.options.iter().map(|o| o.text.clone()).collect(),
                }
            } else {
                RepeatValues {
                    values: s.value.clone(),
                    texts: s.text.clone(),
                }
            }
        });
        values.deduplicated()
    }

    /// Whether the current selection is the all sentinel.
    #[must_use]
    pub fn has_all_value(&self) -> bool {
        self.state
            .with(|s| s.value.first().is_some_and(|v| v == ALL_VARIABLE_VALUE))
    }

    #[must_use]
    pub fn include_all(&self) -> bool {
        self.state.with(|s| s.include_all)
    }

    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.state.with(|s| s.is_multi)
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.with(|s| s.loading)
    }

    pub fn set_loading(&self, loading: bool) {
        self.state.update(|s| s.loading = loading);
    }

    /// Install freshly resolved options and clear the loading flag.
    ///
    /// Selected values missing from `options` are dropped. When nothing
    /// survives, the selection falls back to the all sentinel (if allowed)
    /// or the first option.
    pub fn resolve(&self, options: Vec<VariableOption>) {
        self.state.update(|s| {
            s.options = options;
            s.loading = false;
            let keeps_all = s.include_all && s.value.iter().any(|v| v == ALL_VARIABLE_VALUE);
            if !keeps_all {
                let valid = unique_in_order(
                    s.value
                        .iter()
                        .filter(|v| s.options.iter().any(|o| &o.value == *v))
                        .cloned(),
                );
                s.value = if !valid.is_empty() {
                    valid
                } else if s.include_all {
                    vec![ALL_VARIABLE_VALUE.to_string()]
                } else {
                    s.options
                        .first()
                        .map(|o| vec![o.value.clone()])
                        .unwrap_or_default()
                };
            }
            s.text = texts_for(&s.options, &s.value);
        });
    }

    /// Change the selection. Repeated values are dropped; single-value
    /// variables keep only the first value.
    pub fn select<S: AsRef<str>>(&self, values: &[S]) {
        self.state.update(|s| {
            let mut next = unique_in_order(values.iter().map(|v| v.as_ref().to_string()));
            if !s.is_multi {
                next.truncate(1);
            }
            s.text = texts_for(&s.options, &next);
            s.value = next;
        });
    }

    pub fn subscribe(&self, callback: impl Fn(&MultiValueState) + 'static) -> Subscription {
        self.state.subscribe(callback)
    }
}

/// State of a free-text variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextState {
    pub name: String,
    pub value: String,
}

/// Variable holding a single free-text value.
#[derive(Debug, Clone)]
pub struct TextVariable {
    state: Observable<TextState>,
}

impl TextVariable {
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            state: Observable::new(TextState {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state.with(|s| s.name.clone())
    }

    #[must_use]
    pub fn value(&self) -> String {
        self.state.with(|s| s.value.clone())
    }

    pub fn set_value(&self, value: &str) {
        self.state.update(|s| s.value = value.to_string());
    }

    pub fn subscribe(&self, callback: impl Fn(&TextState) + 'static) -> Subscription {
        self.state.subscribe(callback)
    }
}

/// Clone-scoped binding of a variable name to one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalValueVariable {
    pub name: String,
    pub value: String,
    pub text: String,
    /// Mirrors the shadowed variable so formatting stays consistent.
    pub is_multi: bool,
    pub include_all: bool,
}

impl LocalValueVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            text: text.into(),
            is_multi: false,
            include_all: false,
        }
    }
}

/// Any variable reachable through scoped lookup.
#[derive(Debug, Clone)]
pub enum Variable {
    Multi(MultiValueVariable),
    Text(TextVariable),
    Local(LocalValueVariable),
}

impl Variable {
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Multi(v) => v.name(),
            Self::Text(v) => v.name(),
            Self::Local(v) => v.name.clone(),
        }
    }

    #[must_use]
    pub fn values(&self) -> RepeatValues {
        match self {
            Self::Multi(v) => v.values(),
            Self::Text(v) => {
                let value = v.value();
                RepeatValues {
                    values: vec![value.clone()],
                    texts: vec![value],
                }
            }
            Self::Local(v) => RepeatValues {
                values: vec![v.value.clone()],
                texts: vec![v.text.clone()],
            },
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        match self {
            Self::Multi(v) => v.is_loading(),
            Self::Text(_) | Self::Local(_) => false,
        }
    }

    #[must_use]
    pub fn has_all_value(&self) -> bool {
        match self {
            Self::Multi(v) => v.has_all_value(),
            Self::Text(_) => false,
            Self::Local(v) => v.value == ALL_VARIABLE_VALUE,
        }
    }

    #[must_use]
    pub fn as_multi(&self) -> Option<&MultiValueVariable> {
        match self {
            Self::Multi(v) => Some(v),
            _ => None,
        }
    }

    /// Run `callback` whenever the variable's state changes.
    ///
    /// Local values never change; their subscription is inert.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        match self {
            Self::Multi(v) => v.subscribe(move |_| callback()),
            Self::Text(v) => v.subscribe(move |_| callback()),
            Self::Local(_) => Subscription::inert(),
        }
    }
}

impl From<MultiValueVariable> for Variable {
    fn from(v: MultiValueVariable) -> Self {
        Self::Multi(v)
    }
}

impl From<TextVariable> for Variable {
    fn from(v: TextVariable) -> Self {
        Self::Text(v)
    }
}

impl From<LocalValueVariable> for Variable {
    fn from(v: LocalValueVariable) -> Self {
        Self::Local(v)
    }
}

/// Variables declared on one scene node.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    variables: Vec<Variable>,
}

impl VariableSet {
    #[must_use]
    pub fn new(variables: Vec<Variable>) -> Self {
        Self { variables }
    }

    /// A set holding a single local value binding.
    #[must_use]
    pub fn local(variable: LocalValueVariable) -> Self {
        Self::new(vec![Variable::Local(variable)])
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Variable> {
        self.variables.iter().find(|v| v.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Resolve `name` starting at `scope` and walking up through its ancestors.
#[must_use]
pub fn lookup_variable(name: &str, scope: &dyn SceneObject) -> Option<Variable> {
    if let Some(found) = scope.variables().and_then(|set| set.get(name)) {
        return Some(found);
    }
    let mut next = scope.core().parent();
    while let Some(node) = next {
        if let Some(found) = node.variables().and_then(|set| set.get(name)) {
            return Some(found);
        }
        next = node.core().parent();
    }
    None
}

fn render_variable(name: &str, format: Option<&str>, scope: &dyn SceneObject) -> Option<String> {
    let variable = lookup_variable(name, scope)?;
    let values = variable.values();
    let parts = if format == Some("text") {
        values.texts
    } else {
        values.values
    };
    Some(match parts.len() {
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("{{{}}}", parts.join(",")),
    })
}

fn name_len(s: &str) -> usize {
    s.char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map_or(s.len(), |(i, _)| i)
}

/// Replace `$name`, `${name}` and `${name:text}` references using variables
/// visible from `scope`. Unknown references are left as written.
///
/// A multi-valued variable renders as `{a,b}`.
#[must_use]
pub fn interpolate(template: &str, scope: &dyn SceneObject) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(inner) = after.strip_prefix('{')
            && let Some(end) = inner.find('}')
        {
            let expr = &inner[..end];
            let (name, format) = match expr.split_once(':') {
                Some((name, format)) => (name, Some(format)),
                None => (expr, None),
            };
            match render_variable(name, format, scope) {
                Some(text) => out.push_str(&text),
                None => out.push_str(&rest[pos..pos + end + 3]),
            }
            rest = &inner[end + 1..];
            continue;
        }

        let len = name_len(after);
        if len > 0
            && let Some(text) = render_variable(&after[..len], None, scope)
        {
            out.push_str(&text);
            rest = &after[len..];
            continue;
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::TestNode;
    use std::rc::Rc;

    fn server_variable() -> MultiValueVariable {
        MultiValueVariable::new(MultiValueState {
            name: "server".into(),
            options: vec![
                VariableOption::new("a", "Alpha"),
                VariableOption::new("b", "Beta"),
                VariableOption::new("c", "Gamma"),
            ],
            value: vec!["a".into(), "c".into()],
            text: vec!["Alpha".into(), "Gamma".into()],
            include_all: true,
            is_multi: true,
            loading: false,
        })
    }

    #[test]
    fn values_follow_selection() {
        let var = server_variable();
        let values = var.values();
        assert_eq!(values.values, vec!["a", "c"]);
        assert_eq!(values.texts, vec!["Alpha", "Gamma"]);
        assert!(!var.has_all_value());
    }

    #[test]
    fn all_selection_expands_to_every_option() {
        let var = server_variable();
        var.select(&[ALL_VARIABLE_VALUE]);
        assert!(var.has_all_value());
        assert_eq!(var.state().text, vec![ALL_VARIABLE_TEXT]);
        assert_eq!(var.values().values, vec!["a", "b", "c"]);
    }

    #[test]
    fn resolve_drops_stale_selection() {
        let var = server_variable();
        var.set_loading(true);
        var.resolve(vec![VariableOption::new("c", "Gamma"), VariableOption::new("d", "Delta")]);
        assert!(!var.is_loading());
        assert_eq!(var.values().values, vec!["c"]);

        var.resolve(vec![VariableOption::new("x", "X")]);
        assert!(var.has_all_value(), "include_all falls back to All");
    }

    #[test]
    fn resolve_without_include_all_picks_first_option() {
        let var = MultiValueVariable::custom("dc", &["east"]);
        var.resolve(vec![VariableOption::new("west", "West")]);
        assert_eq!(var.values().values, vec!["west"]);
        assert_eq!(var.values().texts, vec!["West"]);
    }

    #[test]
    fn single_value_select_truncates() {
        let var = MultiValueVariable::new(MultiValueState {
            name: "env".into(),
            options: vec![VariableOption::new("prod", "prod")],
            is_multi: false,
            ..MultiValueState::default()
        });
        var.select(&["prod", "dev"]);
        assert_eq!(var.values().values, vec!["prod"]);
    }

    #[test]
    fn repeated_selection_values_collapse() {
        let var = server_variable();
        var.select(&["a", "b", "b", "a"]);
        assert_eq!(var.state().value, vec!["a", "b"]);
        assert_eq!(var.values().texts, vec!["Alpha", "Beta"]);

        let raw = MultiValueVariable::new(MultiValueState {
            name: "dc".into(),
            value: vec!["east".into(), "west".into(), "east".into()],
            text: vec!["East".into(), "West".into(), "East".into()],
            is_multi: true,
            ..MultiValueState::default()
        });
        let values = raw.values();
        assert_eq!(values.values, vec!["east", "west"]);
        assert_eq!(values.texts, vec!["East", "West"]);
    }

    #[test]
    fn lookup_prefers_nearest_scope() {
        let outer = VariableSet::new(vec![server_variable().into()]);
        let local = VariableSet::local(LocalValueVariable::new("server", "b", "Beta"));
        let leaf = TestNode::new("leaf", &Rc::default(), Some(local), Vec::new());
        let _root = TestNode::new("root", &Rc::default(), Some(outer), vec![Rc::clone(&leaf)]);

        let found = lookup_variable("server", &*leaf).expect("visible");
        assert!(matches!(found, Variable::Local(_)));
        assert_eq!(found.values().values, vec!["b"]);
        assert!(lookup_variable("missing", &*leaf).is_none());
    }

    #[test]
    fn interpolation_forms() {
        let vars = VariableSet::new(vec![
            server_variable().into(),
            TextVariable::new("region", "eu-1").into(),
        ]);
        let node = TestNode::new("n", &Rc::default(), Some(vars), Vec::new());

        assert_eq!(interpolate("CPU $region", &*node), "CPU eu-1");
        assert_eq!(interpolate("${region}-x", &*node), "eu-1-x");
        assert_eq!(interpolate("$server", &*node), "{a,c}");
        assert_eq!(interpolate("${server:text}", &*node), "{Alpha,Gamma}");
        assert_eq!(interpolate("$nope ${nope} $ 5$", &*node), "$nope ${nope} $ 5$");
    }

    #[test]
    fn local_value_interpolates_inside_clone() {
        let local = VariableSet::local(LocalValueVariable::new("server", "b", "Beta"));
        let node = TestNode::new("clone", &Rc::default(), Some(local), Vec::new());
        assert_eq!(interpolate("Host ${server:text} ($server)", &*node), "Host Beta (b)");
    }

    #[test]
    fn variable_subscription_fires_on_change() {
        let var = server_variable();
        let hits = Rc::new(std::cell::Cell::new(0u32));
        let hits_clone = Rc::clone(&hits);
        let _sub = Variable::from(var.clone()).subscribe(move || hits_clone.set(hits_clone.get() + 1));
        var.select(&["b"]);
        var.select(&["b"]);
        assert_eq!(hits.get(), 1);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn text_without_references_is_unchanged(s in "[a-zA-Z0-9 _.,-]{0,40}") {
                let node = TestNode::leaf("n");
                prop_assert_eq!(interpolate(&s, &*node), s);
            }
        }
    }
}
