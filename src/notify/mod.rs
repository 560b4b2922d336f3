//! Database notification fan-out.
//!
//! Moderation actions are broadcast to every process in the fleet through
//! named publish/subscribe channels on the shared database (PostgreSQL
//! LISTEN/NOTIFY). Payloads are small JSON envelopes carrying only record
//! ids and the originating server id; the authoritative record is always
//! re-fetched by id, never trusted from the envelope.

pub mod bus;
pub mod listener;
pub mod payloads;
pub mod rate_limit;
pub mod subscription;

pub use bus::{MemoryNotifyBus, NotifyBus, NotifyError, NotifyStream, PgNotifyBus};
pub use listener::{Backoff, run_listener};
pub use payloads::{BanNotice, FleetKickNotice, UsernameRuleNotice};
pub use rate_limit::NotifyRateLimiter;
pub use subscription::{NotificationRouter, NotificationSink, NotificationSubscription};

/// Channel for new or pardoned ban records.
pub const BAN_CHANNEL: &str = "ban_notification";
/// Channel for created or retired username rules.
pub const USERNAME_RULE_CHANNEL: &str = "username_rule_notification";
/// Channel for cross-server duplicate-login kicks.
pub const FLEET_KICK_CHANNEL: &str = "multi_server_kick";

/// All channels a moderation process subscribes to.
pub const ALL_CHANNELS: &[&str] = &[BAN_CHANNEL, USERNAME_RULE_CHANNEL, FLEET_KICK_CHANNEL];

/// A raw notification as delivered by the database layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseNotification {
    /// The channel the notification arrived on.
    pub channel: String,
    /// The JSON payload, if any.
    pub payload: Option<String>,
}
