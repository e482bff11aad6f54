#![forbid(unsafe_code)]

//! Scene events published by nodes and consumed by outer layers
//! (URL sync, solo-panel view).

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use dashgrid_core::Subscription;

use crate::node::{NodeRef, SceneObject, WeakNodeRef};

/// Which engine produced a repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatKind {
    Panel,
    Row,
}

/// Events dispatched through the scene tree.
#[derive(Clone)]
pub enum SceneEvent {
    /// A repeat cycle finished materialising its clones.
    RepeatsProcessed {
        source: WeakNodeRef,
        key: String,
        kind: RepeatKind,
    },
}

impl SceneEvent {
    /// Build a `RepeatsProcessed` event for `source`.
    ///
    /// Returns `None` when `source` has not been mounted.
    #[must_use]
    pub fn repeats_processed(source: &dyn SceneObject, kind: RepeatKind) -> Option<Self> {
        let weak = source.core().this_weak()?;
        Some(Self::RepeatsProcessed {
            source: weak,
            key: source.key(),
            kind,
        })
    }

    /// Key of the node that published the event.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::RepeatsProcessed { key, .. } => key,
        }
    }

    /// The publishing node, if it is still alive.
    #[must_use]
    pub fn source(&self) -> Option<NodeRef> {
        match self {
            Self::RepeatsProcessed { source, .. } => source.upgrade(),
        }
    }
}

impl fmt::Debug for SceneEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RepeatsProcessed { key, kind, .. } => f
                .debug_struct("RepeatsProcessed")
                .field("key", key)
                .field("kind", kind)
                .finish_non_exhaustive(),
        }
    }
}

type Handler = dyn Fn(&SceneEvent);

/// Weakly held event handlers of one node.
#[derive(Default)]
pub struct EventHandlers {
    handlers: RefCell<Vec<Weak<Handler>>>,
}

impl EventHandlers {
    pub fn subscribe(&self, handler: impl Fn(&SceneEvent) + 'static) -> Subscription {
        let strong: Rc<Handler> = Rc::new(handler);
        self.handlers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription::from_guard(Box::new(strong))
    }

    /// Call every live handler, pruning dropped ones.
    pub fn dispatch(&self, event: &SceneEvent) {
        let live: Vec<Rc<Handler>> = {
            let mut handlers = self.handlers.borrow_mut();
            handlers.retain(|h| h.strong_count() > 0);
            handlers.iter().filter_map(Weak::upgrade).collect()
        };
        for handler in live {
            handler(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
