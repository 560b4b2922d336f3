//! Role registration for role bans.
//!
//! Role bans reference roles by id. The registry is an explicit table built
//! at startup from the embedding game's role list; resolving a name that is
//! unknown, or that exists under more than one category, fails synchronously
//! so admin commands surface the mistake immediately.

use crate::error::BanError;
use std::collections::HashMap;

/// Canonical role identifier, `category:name` (e.g. `job:captain`).
pub type RoleId = String;

/// Explicit role lookup table. No runtime type inspection; everything is
/// registered up front.
#[derive(Debug, Default, Clone)]
pub struct RoleRegistry {
    /// Lowercased bare name -> canonical ids registered under that name.
    by_name: HashMap<String, Vec<RoleId>>,
    /// All canonical ids, for exact lookups.
    ids: HashMap<RoleId, ()>,
}

impl RoleRegistry {
    pub fn new() -> RoleRegistry {
        RoleRegistry::default()
    }

    /// Build a registry from canonical `category:name` ids.
    pub fn from_ids<I, S>(ids: I) -> RoleRegistry
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleId>,
    {
        let mut registry = RoleRegistry::new();
        for id in ids {
            registry.register(id.into());
        }
        registry
    }

    pub fn register(&mut self, id: RoleId) {
        let bare = id.rsplit(':').next().unwrap_or(&id).to_lowercase();
        let entry = self.by_name.entry(bare).or_default();
        if !entry.contains(&id) {
            entry.push(id.clone());
        }
        self.ids.insert(id, ());
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolve a role reference from an admin command.
    ///
    /// Accepts either a canonical id or a bare name. A bare name registered
    /// under two categories is ambiguous and rejected.
    pub fn resolve(&self, reference: &str) -> Result<RoleId, BanError> {
        if self.ids.contains_key(reference) {
            return Ok(reference.to_string());
        }
        match self.by_name.get(&reference.to_lowercase()) {
            Some(candidates) if candidates.len() == 1 => Ok(candidates[0].clone()),
            Some(_) => Err(BanError::AmbiguousRole(reference.to_string())),
            None => Err(BanError::UnknownRole(reference.to_string())),
        }
    }
}
