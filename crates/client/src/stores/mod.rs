//! Local state containers used by the hooks.

pub mod entity;
pub mod optimistic;

pub use entity::{AppendOutcome, EntityStore, Keyed};
pub use optimistic::{Optimistic, Reconciliation};
