//! Connected-session state and the per-session data cache.
//!
//! Everything in this module is owned by the moderation actor task and is
//! therefore lock-free; see [`crate::enforce`] for the ownership rule.

pub mod cache;
pub mod session;

pub use cache::{LoadWait, SessionData, SessionDataCache};
pub use session::{PlayerSession, SessionId, SessionMessage, SessionTable};
