//! Notification payload envelopes.
//!
//! Envelopes identify a record and the server that produced it; nothing
//! else. Content is always re-fetched from the store by id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload on [`super::BAN_CHANNEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanNotice {
    pub ban_id: i32,
    /// Originating server, if known. Used only for self-origin suppression.
    #[serde(default)]
    pub server_id: Option<i32>,
}

/// Payload on [`super::USERNAME_RULE_CHANNEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameRuleNotice {
    pub username_rule_id: i32,
    #[serde(default)]
    pub server_id: Option<i32>,
}

/// Payload on [`super::FLEET_KICK_CHANNEL`].
///
/// Sent when a player logs in on one server while connected to another;
/// every other server kicks its stale session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetKickNotice {
    pub player_id: Uuid,
    pub server_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_notice_server_id_is_optional() {
        let notice: BanNotice = serde_json::from_str(r#"{"ban_id": 17}"#).unwrap();
        assert_eq!(notice.ban_id, 17);
        assert_eq!(notice.server_id, None);

        let notice: BanNotice =
            serde_json::from_str(r#"{"ban_id": 17, "server_id": 3}"#).unwrap();
        assert_eq!(notice.server_id, Some(3));
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(serde_json::from_str::<BanNotice>("not json").is_err());
        assert!(serde_json::from_str::<BanNotice>(r#"{"server_id": 3}"#).is_err());
    }
}
