//! rtc-bridge Types
//!
//! Shared type definitions for session descriptions, candidates, states and
//! the tagged event records delivered to controllers.

pub mod events;
pub mod schemas;
pub mod error;

pub use events::*;
pub use schemas::*;
pub use error::TypesError;
