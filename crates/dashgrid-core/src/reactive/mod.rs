#![forbid(unsafe_code)]

//! Reactive primitives shared by scene nodes and variables.
//!
//! - [`Observable`]: shared, version-tracked value with change notification.
//! - [`BatchScope`]: RAII guard that coalesces notifications.

pub mod batch;
pub mod observable;

pub use batch::BatchScope;
pub use observable::{Observable, Subscription};
