//! Idempotent admission.
//!
//! An [`IdempotentFilter`] lets each unique id through once per consumer
//! identity. Ids are recorded in an [`IdempotentStore`]; the [`FileStore`]
//! keeps them across restarts.
//!
//! Delivery is at-least-once: a crash between accepting an id and flushing
//! it can let one duplicate through after restart.

pub mod filter;
pub mod store;

pub use filter::{IdExtractor, IdempotentFilter};
pub use store::{FileStore, IdempotentStore, InMemoryStore};
