#![forbid(unsafe_code)]

//! Observable tree nodes.
//!
//! # Design
//!
//! Every concrete node type embeds a [`NodeCore`] and implements
//! [`SceneObject`]. Ownership flows strictly from parent to children
//! (`Rc`); the back-reference to the parent and the node's own self handle
//! are `Weak`, so dropping a subtree never leaks through cycles.
//!
//! State records are replaced wholesale through [`NodeCore::commit`], which
//! keeps parent links and activation in step with the children the new
//! record names.
//!
//! # Invariants
//!
//! 1. Activation is bottom-up: children activate before their parent runs its
//!    own activation handler.
//!    Children that join while the node is activating are activated right
//!    after its handler.
//! 2. Deactivation runs the node's teardown callbacks before descending.
//! 3. A node is only parented by the node whose current state lists it.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use dashgrid_core::{Observable, Subscription};
use tracing::trace;

use crate::events::{EventHandlers, SceneEvent};
use crate::variables::VariableSet;

/// Strong, type-erased handle to a scene node.
pub type NodeRef = Rc<dyn SceneObject>;

/// Non-owning handle to a scene node.
pub type WeakNodeRef = Weak<dyn SceneObject>;

/// Callback run once when a node deactivates.
pub type Teardown = Box<dyn FnOnce()>;

/// Identity comparison of two node handles, ignoring vtable metadata.
#[must_use]
pub fn same_node(a: &NodeRef, b: &NodeRef) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

fn weak_addr(weak: &WeakNodeRef) -> *const () {
    weak.as_ptr() as *const ()
}

/// Tree bookkeeping shared by all node types.
#[derive(Default)]
pub struct NodeCore {
    this: RefCell<Option<WeakNodeRef>>,
    parent: RefCell<Option<WeakNodeRef>>,
    active: Cell<bool>,
    teardown: RefCell<Vec<Teardown>>,
    handlers: EventHandlers,
}

impl NodeCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strong handle to the node owning this core, once mounted.
    #[must_use]
    pub fn this_node(&self) -> Option<NodeRef> {
        self.this.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Weak handle to the node owning this core, once mounted.
    #[must_use]
    pub fn this_weak(&self) -> Option<WeakNodeRef> {
        self.this.borrow().clone()
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Register an event handler on this node.
    pub fn subscribe_events(&self, handler: impl Fn(&SceneEvent) + 'static) -> Subscription {
        self.handlers.subscribe(handler)
    }

    pub(crate) fn set_parent(&self, parent: Option<WeakNodeRef>) {
        *self.parent.borrow_mut() = parent;
    }

    fn is_parented_by(&self, addr: *const ()) -> bool {
        self.parent
            .borrow()
            .as_ref()
            .is_some_and(|parent| std::ptr::eq(weak_addr(parent), addr))
    }

    /// Replace `state` with `next`.
    ///
    /// Children listed by `next` are parented to this node before observers
    /// are notified. When this node is active, children that left the list
    /// are deactivated and children that joined it are activated. A removed
    /// child that has already been re-parented elsewhere is left alone.
    pub fn commit<S: SceneState>(&self, state: &Observable<S>, next: S) {
        let previous = state.with(|s| s.children());
        let incoming = next.children();
        let this = self.this_weak();

        if let Some(this) = &this {
            for child in &incoming {
                child.core().set_parent(Some(this.clone()));
            }
        }

        state.replace(next);

        let removed: Vec<NodeRef> = previous
            .iter()
            .filter(|old| !incoming.iter().any(|new| same_node(old, new)))
            .cloned()
            .collect();
        let added: Vec<NodeRef> = incoming
            .iter()
            .filter(|new| !previous.iter().any(|old| same_node(old, new)))
            .cloned()
            .collect();

        let addr = this.as_ref().map(weak_addr);
        for old in &removed {
            let ours = addr.is_some_and(|addr| old.core().is_parented_by(addr));
            if ours {
                old.core().set_parent(None);
                if self.is_active() {
                    old.deactivate();
                }
            }
        }

        if self.is_active() {
            for new in &added {
                new.activate();
            }
        }
    }
}

/// State records whose children are scene nodes.
pub trait SceneState: Clone + 'static {
    fn children(&self) -> Vec<NodeRef>;
}

/// A node in the dashboard scene tree.
pub trait SceneObject: 'static {
    fn core(&self) -> &NodeCore;

    /// Key unique within the containing grid.
    fn key(&self) -> String;

    /// Owned children in activation order.
    fn children(&self) -> Vec<NodeRef>;

    /// Variables declared on this node, shadowing those of its ancestors.
    fn variables(&self) -> Option<VariableSet> {
        None
    }

    /// Called after all children have activated.
    fn on_activate(&self) -> Option<Teardown> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Tree operations available on every scene node.
pub trait SceneNodeExt: SceneObject {
    fn parent(&self) -> Option<NodeRef>;
    fn is_active(&self) -> bool;
    fn activate(&self);
    fn deactivate(&self);
    /// Dispatch `event` to this node's handlers and, when `bubble` is set,
    /// to every ancestor up to the root.
    fn publish_event(&self, event: &SceneEvent, bubble: bool);
}

impl<T: SceneObject + ?Sized> SceneNodeExt for T {
    fn parent(&self) -> Option<NodeRef> {
        self.core().parent()
    }

    fn is_active(&self) -> bool {
        self.core().is_active()
    }

    fn activate(&self) {
        let core = self.core();
        if core.active.get() {
            return;
        }
        for child in self.children() {
            child.activate();
        }
        core.active.set(true);
        if let Some(teardown) = self.on_activate() {
            core.teardown.borrow_mut().push(teardown);
        }
        // Children committed while this node was still inactive.
        for child in self.children() {
            child.activate();
        }
        trace!(key = %self.key(), "node activated");
    }

    fn deactivate(&self) {
        let core = self.core();
        if !core.active.get() {
            return;
        }
        core.active.set(false);
        let teardowns = std::mem::take(&mut *core.teardown.borrow_mut());
        for teardown in teardowns {
            teardown();
        }
        for child in self.children() {
            child.deactivate();
        }
        trace!(key = %self.key(), "node deactivated");
    }

    fn publish_event(&self, event: &SceneEvent, bubble: bool) {
        self.core().handlers.dispatch(event);
        if !bubble {
            return;
        }
        let mut next = self.core().parent();
        while let Some(node) = next {
            node.core().handlers.dispatch(event);
            next = node.core().parent();
        }
    }
}

fn bind<T: SceneObject>(node: &Rc<T>) {
    let weak: WeakNodeRef = Rc::<T>::downgrade(node);
    *node.core().this.borrow_mut() = Some(weak.clone());
    for child in node.children() {
        child.core().set_parent(Some(weak.clone()));
    }
}

/// Wrap `node` in an `Rc`, bind its self handle and parent its children.
pub fn mount<T: SceneObject>(node: T) -> Rc<T> {
    let node = Rc::new(node);
    bind(&node);
    node
}

/// Like [`mount`], for nodes that keep a typed weak handle to themselves.
pub fn mount_cyclic<T: SceneObject>(make: impl FnOnce(&Weak<T>) -> T) -> Rc<T> {
    let node = Rc::new_cyclic(make);
    bind(&node);
    node
}

/// Recover the concrete type behind a type-erased handle.
#[must_use]
pub fn downcast_node<T: SceneObject>(node: &NodeRef) -> Option<Rc<T>> {
    Rc::clone(node).into_any_rc().downcast::<T>().ok()
}

/// Nearest ancestor of `node` with concrete type `T`.
#[must_use]
pub fn find_ancestor<T: SceneObject>(node: &dyn SceneObject) -> Option<Rc<T>> {
    let mut next = node.core().parent();
    while let Some(current) = next {
        if let Some(found) = downcast_node::<T>(&current) {
            return Some(found);
        }
        next = current.core().parent();
    }
    None
}
