//! Shared types for the murmur chat state layer and its transports.

pub mod error;
pub mod events;
pub mod models;

pub use error::*;
pub use events::*;
pub use models::*;
