#![forbid(unsafe_code)]

//! Core: grid geometry and single-threaded reactive primitives.
//!
//! # Role in dashgrid
//! `dashgrid-core` is the bottom layer. It owns the grid coordinate model
//! ([`GridPos`]) and the [`Observable`] cell every scene node stores its
//! state in. Nothing here knows about panels, rows or variables.
//!
//! # How it fits in the system
//! `dashgrid-scene` builds the observable tree on top of [`Observable`];
//! `dashgrid-layout` uses [`GridPos`] for every grid item and wraps list
//! replacements in a [`BatchScope`] so observers only see final states.

pub mod geometry;
pub mod reactive;

pub use geometry::{GRID_COLUMN_COUNT, GridPos};
pub use reactive::{BatchScope, Observable, Subscription};
