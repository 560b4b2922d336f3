//! The pure ban matching algorithm.
//!
//! `matches` never consults expiry or pardon state; callers filter inactive
//! records first. Checks run address, then user id, then hardware id, and
//! the first satisfied check wins.

use crate::ban::record::{BanRecord, ExemptFlags, HwId, normalize_addr};
use std::net::IpAddr;
use uuid::Uuid;

/// Ephemeral view of a connecting player, constructed per match attempt.
#[derive(Debug, Clone, Default)]
pub struct PlayerInfo {
    pub user_id: Option<Uuid>,
    pub address: Option<IpAddr>,
    pub hardware_id: Option<HwId>,
    pub exempt_flags: ExemptFlags,
    /// True if no prior player record exists for this account.
    pub is_new_account: bool,
}

/// Does `ban` apply to `player`?
pub fn matches(ban: &BanRecord, player: &PlayerInfo) -> bool {
    // Holding any exemption also exempts from general range-blacklist bans.
    let mut effective = player.exempt_flags;
    if !effective.is_empty() {
        effective |= ExemptFlags::BLACKLISTED_RANGE;
    }

    // The ban explicitly yields to one of the player's exemptions.
    if ban.exempt_flags().intersects(effective) {
        return false;
    }

    address_matches(ban, player, effective)
        || user_matches(ban, player)
        || hwid_matches(ban, player)
}

fn address_matches(ban: &BanRecord, player: &PlayerInfo, effective: ExemptFlags) -> bool {
    if effective.contains(ExemptFlags::IP) {
        return false;
    }
    let Some(addr) = player.address else {
        return false;
    };
    let addr = normalize_addr(addr);
    if !ban.address_ranges.iter().any(|range| range.contains(&addr)) {
        return false;
    }
    // Blacklisted-range bans only apply to fresh accounts. This avoids
    // false positives on shared NAT ranges for returning players.
    !ban.exempt_flags().contains(ExemptFlags::BLACKLISTED_RANGE) || player.is_new_account
}

fn user_matches(ban: &BanRecord, player: &PlayerInfo) -> bool {
    player
        .user_id
        .is_some_and(|uid| ban.user_ids.contains(&uid))
}

fn hwid_matches(ban: &BanRecord, player: &PlayerInfo) -> bool {
    let Some(hwid) = &player.hardware_id else {
        return false;
    };
    if hwid.is_empty() {
        return false;
    }
    ban.hardware_ids.iter().any(|h| !h.is_empty() && h == hwid)
}
