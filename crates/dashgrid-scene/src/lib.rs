#![forbid(unsafe_code)]

//! Scene tree for dashgrid.
//!
//! A dashboard is a tree of scene nodes. Every node owns a replaceable state
//! record (an [`Observable`](dashgrid_core::Observable)), a weak link to its
//! parent and an activation flag. Variables live in [`VariableSet`]s attached
//! to nodes and are resolved by walking up the tree.

pub mod dependency;
pub mod events;
pub mod node;
pub mod variables;

pub use dependency::VariableDependency;
pub use events::{RepeatKind, SceneEvent};
pub use node::{
    NodeCore, NodeRef, SceneNodeExt, SceneObject, SceneState, Teardown, WeakNodeRef,
    downcast_node, find_ancestor, mount, mount_cyclic, same_node,
};
pub use variables::{
    ALL_VARIABLE_TEXT, ALL_VARIABLE_VALUE, LocalValueVariable, MultiValueState,
    MultiValueVariable, RepeatValues, TextVariable, Variable, VariableOption, VariableSet,
    interpolate, lookup_variable,
};
