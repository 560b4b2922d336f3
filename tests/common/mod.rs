#![allow(dead_code)]
//! Integration test common infrastructure.
//!
//! Provides an in-memory fleet store and notification bus so several
//! moderation engines can run in one process and exercise the same
//! propagation paths two real servers would over PostgreSQL.

pub mod fleet;
pub mod store;

#[allow(unused_imports)]
pub use fleet::{TestFleet, TestPlayer, eventually};
#[allow(unused_imports)]
pub use store::MemStore;
