//! Ban records and the pure matching algorithm.
//!
//! A [`BanRecord`] is the persisted description of who is disallowed from
//! connecting (server bans) or from taking specific roles (role bans).
//! [`matcher::matches`] decides whether a record applies to a connecting
//! player; it is pure and side-effect free so it can run on the connect
//! hot path without touching the database.

pub mod matcher;
pub mod record;
pub mod roles;

pub use matcher::{PlayerInfo, matches};
pub use record::{BanKind, BanRecord, ExemptFlags, HwId, Severity, UnbanRecord};
pub use roles::{RoleId, RoleRegistry};
