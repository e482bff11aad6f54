#![forbid(unsafe_code)]

//! Variable dependency tracking.
//!
//! A [`VariableDependency`] watches a set of variable names, resolved from a
//! scope node, and invokes a completion callback each time every watched
//! variable has finished resolving. Notifications that arrive while any
//! watched variable is still loading are swallowed and remembered as
//! pending; the next notification after loading ends fires the callback.
//! Completions raised inside a [`BatchScope`](dashgrid_core::BatchScope) are
//! coalesced into a single call.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use dashgrid_core::Subscription;
use dashgrid_core::reactive::batch;
use tracing::trace;

use crate::node::{SceneObject, WeakNodeRef};
use crate::variables::lookup_variable;

struct DependencyInner {
    names: RefCell<Vec<String>>,
    on_complete: Rc<dyn Fn()>,
    scope: RefCell<Option<WeakNodeRef>>,
    subscriptions: RefCell<Vec<Subscription>>,
    pending: Cell<bool>,
}

impl DependencyInner {
    fn any_loading(&self) -> bool {
        let Some(scope) = self.scope.borrow().as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        self.names
            .borrow()
            .iter()
            .filter_map(|name| lookup_variable(name, &*scope))
            .any(|variable| variable.is_loading())
    }

    fn on_variable_changed(this: &Rc<Self>) {
        if this.any_loading() {
            this.pending.set(true);
            trace!(names = ?this.names.borrow(), "dependency still loading");
            return;
        }
        this.pending.set(false);

        let key = Rc::as_ptr(this) as *const () as usize;
        let weak = Rc::downgrade(this);
        batch::defer_or_run_keyed(key, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let active = inner.scope.borrow().is_some();
            if active {
                (inner.on_complete)();
            }
        });
    }

    fn subscribe_all(this: &Rc<Self>) {
        let Some(scope) = this.scope.borrow().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let subscriptions: Vec<Subscription> = this
            .names
            .borrow()
            .iter()
            .filter_map(|name| lookup_variable(name, &*scope))
            .map(|variable| {
                let weak = Rc::downgrade(this);
                variable.subscribe(move || {
                    if let Some(inner) = weak.upgrade() {
                        DependencyInner::on_variable_changed(&inner);
                    }
                })
            })
            .collect();
        *this.subscriptions.borrow_mut() = subscriptions;
    }
}

/// Watches named variables on behalf of a scene node.
pub struct VariableDependency {
    inner: Rc<DependencyInner>,
}

impl VariableDependency {
    pub fn new<I, S>(names: I, on_complete: impl Fn() + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Rc::new(DependencyInner {
                names: RefCell::new(names.into_iter().map(Into::into).collect()),
                on_complete: Rc::new(on_complete),
                scope: RefCell::new(None),
                subscriptions: RefCell::new(Vec::new()),
                pending: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn variable_names(&self) -> Vec<String> {
        self.inner.names.borrow().clone()
    }

    /// Start watching, resolving variables from `scope`.
    ///
    /// Variables that cannot be found yet are not watched.
    pub fn activate(&self, scope: &dyn SceneObject) {
        *self.inner.scope.borrow_mut() = scope.core().this_weak();
        DependencyInner::subscribe_all(&self.inner);
    }

    /// Stop watching and drop any pending completion.
    pub fn deactivate(&self) {
        self.inner.subscriptions.borrow_mut().clear();
        *self.inner.scope.borrow_mut() = None;
        self.inner.pending.set(false);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.scope.borrow().is_some()
    }

    /// Replace the watched names and reset tracking state.
    pub fn set_variable_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if *self.inner.names.borrow() == names {
            return;
        }
        *self.inner.names.borrow_mut() = names;
        self.inner.pending.set(false);
        self.inner.subscriptions.borrow_mut().clear();
        if self.is_active() {
            DependencyInner::subscribe_all(&self.inner);
        }
    }

    /// Whether any watched variable is still loading.
    #[must_use]
    pub fn has_unresolved_dependency(&self) -> bool {
        self.inner.any_loading()
    }

    /// Whether a notification arrived while loading and has not completed yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.get()
    }
}

impl std::fmt::Debug for VariableDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableDependency")
            .field("names", &self.inner.names.borrow())
            .field("active", &self.is_active())
            .field("pending", &self.inner.pending.get())
            .finish()
    }
}
