#![forbid(unsafe_code)]

//! The clone-per-value primitive shared by panel and row repetition.
//!
//! Both engines follow the same shape: resolve a multi-value variable, skip
//! the cycle when the value list is unchanged, then produce one clone per
//! value carrying a [`LocalValueVariable`] binding. This module owns that
//! shape; geometry is left to [`crate::geometry`].

use std::cell::{Cell, RefCell};
use std::fmt;

use dashgrid_scene::{
    ALL_VARIABLE_TEXT, LocalValueVariable, MultiValueVariable, RepeatValues, SceneObject,
    Variable, VariableSet, lookup_variable,
};

/// Infix separating a template key from a clone suffix.
pub const CLONE_INFIX: &str = "-clone-";

/// Placeholder text for an empty selection without "All" semantics.
pub const NO_VALUE_TEXT: &str = "None";

/// Key of the clone of `template_key` identified by `suffix`.
#[must_use]
pub fn clone_key(template_key: &str, suffix: impl fmt::Display) -> String {
    format!("{template_key}{CLONE_INFIX}{suffix}")
}

/// Whether `key` names a repeat clone of anything.
#[must_use]
pub fn is_clone_key(key: &str) -> bool {
    key.contains(CLONE_INFIX)
}

/// Whether `key` names a clone produced from `template_key`.
#[must_use]
pub fn is_clone_of(key: &str, template_key: &str) -> bool {
    key.strip_prefix(template_key)
        .is_some_and(|rest| rest.starts_with(CLONE_INFIX))
}

/// Substitute a single placeholder value for an empty list so at least one
/// instance always exists.
#[must_use]
pub fn with_placeholder(values: RepeatValues, has_all_value: bool) -> RepeatValues {
    if !values.is_empty() {
        return values;
    }
    let text = if has_all_value {
        ALL_VARIABLE_TEXT
    } else {
        NO_VALUE_TEXT
    };
    RepeatValues {
        values: vec![String::new()],
        texts: vec![text.to_string()],
    }
}

// ============================================================================
// Variable resolution
// ============================================================================

/// Why a repeat cycle could not use its variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatError {
    VariableNotFound { name: String },
    NotMultiValue { name: String },
}

impl fmt::Display for RepeatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VariableNotFound { name } => write!(f, "repeat variable `{name}` not found"),
            Self::NotMultiValue { name } => {
                write!(f, "repeat variable `{name}` is not a multi-value variable")
            }
        }
    }
}

impl std::error::Error for RepeatError {}

/// Resolve the repeat variable `name` visible from `scope`.
pub fn resolve_repeat_variable(
    name: &str,
    scope: &dyn SceneObject,
) -> Result<MultiValueVariable, RepeatError> {
    match lookup_variable(name, scope) {
        Some(Variable::Multi(variable)) => Ok(variable),
        Some(_) => Err(RepeatError::NotMultiValue {
            name: name.to_string(),
        }),
        None => Err(RepeatError::VariableNotFound {
            name: name.to_string(),
        }),
    }
}

// ============================================================================
// Cloning
// ============================================================================

/// Shape of the local binding every clone receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatBinding {
    pub name: String,
    pub is_multi: bool,
    pub include_all: bool,
}

impl RepeatBinding {
    #[must_use]
    pub fn of(variable: &MultiValueVariable) -> Self {
        let state = variable.state();
        Self {
            name: state.name,
            is_multi: state.is_multi,
            include_all: state.include_all,
        }
    }

    /// Binding used when the named variable does not exist.
    #[must_use]
    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_multi: false,
            include_all: false,
        }
    }

    fn local(&self, value: &str, text: &str) -> LocalValueVariable {
        LocalValueVariable {
            name: self.name.clone(),
            value: value.to_string(),
            text: text.to_string(),
            is_multi: self.is_multi,
            include_all: self.include_all,
        }
    }
}

/// Everything a clone factory needs for one value.
#[derive(Debug, Clone)]
pub struct CloneSlot {
    pub index: usize,
    pub value: String,
    pub text: String,
    /// Scope holding the clone's local value binding.
    pub variables: VariableSet,
}

/// Call `make` once per value, in order, with a fresh local binding each.
pub fn clone_per_value<T>(
    binding: &RepeatBinding,
    values: &RepeatValues,
    mut make: impl FnMut(CloneSlot) -> T,
) -> Vec<T> {
    values
        .pairs()
        .enumerate()
        .map(|(index, (value, text))| {
            make(CloneSlot {
                index,
                value: value.to_string(),
                text: text.to_string(),
                variables: VariableSet::local(binding.local(value, text)),
            })
        })
        .collect()
}

// ============================================================================
// Cycle bookkeeping
// ============================================================================

/// What a repeat engine is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatPhase {
    #[default]
    Idle,
    /// Producing clones and writing the resulting state.
    Cycling,
    /// Back-computing the item height after an external resize.
    Resizing,
}

/// Phase marker and change detection for one repeat engine.
///
/// While the phase is not [`RepeatPhase::Idle`], [`RepeatCycle::enter`]
/// refuses to start another phase, and state notifications caused by the
/// engine's own writes are ignored by its observers.
#[derive(Debug, Default)]
pub struct RepeatCycle {
    phase: Cell<RepeatPhase>,
    previous: RefCell<Option<RepeatValues>>,
    waiting: Cell<bool>,
}

impl RepeatCycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> RepeatPhase {
        self.phase.get()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase.get() == RepeatPhase::Idle
    }

    /// Enter `phase` if idle. The phase ends when the guard drops.
    #[must_use]
    pub fn enter(&self, phase: RepeatPhase) -> Option<PhaseGuard<'_>> {
        if !self.is_idle() {
            return None;
        }
        self.phase.set(phase);
        Some(PhaseGuard { cycle: self })
    }

    /// Whether `values` equals the list used by the last completed cycle.
    #[must_use]
    pub fn is_unchanged(&self, values: &RepeatValues) -> bool {
        self.previous.borrow().as_ref() == Some(values)
    }

    pub fn record(&self, values: RepeatValues) {
        *self.previous.borrow_mut() = Some(values);
    }

    #[must_use]
    pub fn previous(&self) -> Option<RepeatValues> {
        self.previous.borrow().clone()
    }

    /// Forget the last value list so the next cycle runs unconditionally.
    pub fn reset(&self) {
        *self.previous.borrow_mut() = None;
        self.waiting.set(false);
    }

    pub fn set_waiting(&self, waiting: bool) {
        self.waiting.set(waiting);
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.get()
    }
}

/// Returns its [`RepeatCycle`] to idle on drop.
#[derive(Debug)]
pub struct PhaseGuard<'a> {
    cycle: &'a RepeatCycle,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.cycle.phase.set(RepeatPhase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashgrid_scene::ALL_VARIABLE_VALUE;

    fn values(list: &[&str]) -> RepeatValues {
        RepeatValues {
            values: list.iter().map(|v| (*v).to_string()).collect(),
            texts: list.iter().map(|v| v.to_uppercase()).collect(),
        }
    }

    #[test]
    fn clone_keys_are_template_scoped() {
        let key = clone_key("panel-4", 2);
        assert_eq!(key, "panel-4-clone-2");
        assert!(is_clone_key(&key));
        assert!(is_clone_of(&key, "panel-4"));
        assert!(!is_clone_of(&key, "panel-"));
        assert!(!is_clone_of("panel-44-clone-1", "panel-4"));
        assert!(!is_clone_key("panel-4"));
    }

    #[test]
    fn placeholder_only_for_empty_lists() {
        let kept = with_placeholder(values(&["a"]), true);
        assert_eq!(kept.values, vec!["a"]);

        let all = with_placeholder(RepeatValues::default(), true);
        assert_eq!(all.values, vec![""]);
        assert_eq!(all.texts, vec![ALL_VARIABLE_TEXT]);

        let none = with_placeholder(RepeatValues::default(), false);
        assert_eq!(none.texts, vec![NO_VALUE_TEXT]);
    }

    #[test]
    fn one_slot_per_value_with_local_binding() {
        let binding = RepeatBinding {
            name: "server".into(),
            is_multi: true,
            include_all: true,
        };
        let slots = clone_per_value(&binding, &values(&["a", "b", "c"]), |slot| slot);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[1].index, 1);
        assert_eq!(slots[1].value, "b");
        assert_eq!(slots[1].text, "B");

        let Some(Variable::Local(local)) = slots[2].variables.get("server") else {
            panic!("expected a local binding");
        };
        assert_eq!(local.value, "c");
        assert!(local.is_multi && local.include_all);
    }

    #[test]
    fn resolve_reports_missing_and_mismatched_variables() {
        use dashgrid_scene::{NodeCore, NodeRef, TextVariable, mount};
        use std::any::Any;
        use std::rc::Rc;

        struct Scope {
            core: NodeCore,
            vars: VariableSet,
        }
        impl SceneObject for Scope {
            fn core(&self) -> &NodeCore {
                &self.core
            }
            fn key(&self) -> String {
                "scope".into()
            }
            fn children(&self) -> Vec<NodeRef> {
                Vec::new()
            }
            fn variables(&self) -> Option<VariableSet> {
                Some(self.vars.clone())
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
                self
            }
        }

        let scope = mount(Scope {
            core: NodeCore::new(),
            vars: VariableSet::new(vec![
                MultiValueVariable::custom("server", &["a"]).into(),
                TextVariable::new("note", "x").into(),
            ]),
        });

        assert!(resolve_repeat_variable("server", &*scope).is_ok());
        assert_eq!(
            resolve_repeat_variable("note", &*scope).err(),
            Some(RepeatError::NotMultiValue { name: "note".into() })
        );
        let missing = resolve_repeat_variable("gone", &*scope).err();
        assert_eq!(
            missing.map(|e| e.to_string()),
            Some("repeat variable `gone` not found".to_string())
        );
        assert_ne!(ALL_VARIABLE_VALUE, "");
    }

    #[test]
    fn phase_guard_rejects_reentry_and_resets() {
        let cycle = RepeatCycle::new();
        {
            let _guard = cycle.enter(RepeatPhase::Cycling).expect("idle");
            assert_eq!(cycle.phase(), RepeatPhase::Cycling);
            assert!(cycle.enter(RepeatPhase::Resizing).is_none());
        }
        assert!(cycle.is_idle());
    }

    #[test]
    fn change_detection_and_reset() {
        let cycle = RepeatCycle::new();
        let v = values(&["1", "2"]);
        assert!(!cycle.is_unchanged(&v));
        cycle.record(v.clone());
        assert!(cycle.is_unchanged(&v));
        assert!(!cycle.is_unchanged(&values(&["1"])));

        cycle.set_waiting(true);
        cycle.reset();
        assert!(!cycle.is_unchanged(&v));
        assert!(!cycle.is_waiting());
    }
}
