//! Correlated events.
//!
//! - **`event`**: the immutable `Event` unit, its `EventId`, and the `GroupId`
//!   key with no-correlation-id folding.

pub mod event;

pub use event::*;
