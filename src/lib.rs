//! wardend - fleet-wide player moderation for game servers.
//!
//! A fleet of independently running game-server processes shares one
//! PostgreSQL database. Each process enforces bans and username rules
//! against its own connected players with in-memory caches on the hot
//! paths, and learns about moderation actions taken on *other* processes
//! through database LISTEN/NOTIFY fan-out - no polling, and no
//! double-processing of its own actions.
//!
//! Embed the engine with [`enforce::start`] and drive it through the
//! returned [`enforce::ModerationHandle`].

pub mod ban;
pub mod config;
pub mod db;
pub mod enforce;
pub mod error;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod rules;
pub mod state;

pub use ban::{BanKind, BanRecord, ExemptFlags, HwId, PlayerInfo, RoleRegistry, Severity};
pub use enforce::{EngineOptions, ModerationHandle};
pub use error::BanError;
