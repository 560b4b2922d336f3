//! Username rules and the compiled-pattern cache.
//!
//! Rules either match a literal username or a regex. The cache keeps every
//! active rule compiled, with an extra exact-match index for literals so
//! the common case is an O(1) hash lookup at connect time. Regex rules are
//! scanned linearly; rule counts are small and the check runs only on
//! connect, not per tick.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// A persisted username rule.
#[derive(Debug, Clone)]
pub struct UsernameRule {
    /// Assigned by the store on insert; 0 until then.
    pub id: i32,
    pub is_regex: bool,
    pub expression: String,
    /// Message shown to players whose username is rejected.
    pub message: String,
    /// Whether a matching username should also trigger a ban, not just a
    /// rename prompt.
    pub extend_to_ban: bool,
    pub retired: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub retired_by: Option<Uuid>,
    pub retired_at: Option<DateTime<Utc>>,
}

/// Result of a username check against the rule cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHit {
    pub rule_id: i32,
    pub message: String,
    pub extend_to_ban: bool,
}

enum CompiledPattern {
    Exact(String),
    Pattern(Regex),
}

struct CompiledRule {
    id: i32,
    pattern: CompiledPattern,
    message: String,
    extend_to_ban: bool,
}

/// Compiled-rule cache with an exact-match index for literal rules.
#[derive(Default)]
pub struct RuleCache {
    rules: HashMap<i32, CompiledRule>,
    /// Literal expression -> rule id, for non-regex rules.
    exact: HashMap<String, i32>,
}

impl RuleCache {
    pub fn new() -> RuleCache {
        RuleCache::default()
    }

    /// Insert, replace, or (for retired rules) remove a rule.
    ///
    /// A rule that fails to compile is logged and skipped; one bad row in
    /// the database must not take the cache down.
    pub fn apply(&mut self, rule: &UsernameRule) {
        if rule.retired {
            self.remove(rule.id);
            return;
        }

        let pattern = if rule.is_regex {
            match Regex::new(&rule.expression) {
                Ok(regex) => CompiledPattern::Pattern(regex),
                Err(e) => {
                    warn!(rule_id = rule.id, error = %e, "username rule failed to compile, skipped");
                    self.remove(rule.id);
                    return;
                }
            }
        } else {
            CompiledPattern::Exact(rule.expression.clone())
        };

        // Replacing a rule must not leave a stale exact-index entry behind.
        self.remove(rule.id);
        if let CompiledPattern::Exact(literal) = &pattern {
            self.exact.insert(literal.clone(), rule.id);
        }
        self.rules.insert(
            rule.id,
            CompiledRule {
                id: rule.id,
                pattern,
                message: rule.message.clone(),
                extend_to_ban: rule.extend_to_ban,
            },
        );
        debug!(rule_id = rule.id, regex = rule.is_regex, "username rule cached");
    }

    pub fn remove(&mut self, id: i32) {
        if let Some(old) = self.rules.remove(&id)
            && let CompiledPattern::Exact(literal) = &old.pattern
        {
            self.exact.remove(literal);
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check a username. Exact index first, then the compiled regexes.
    /// Whitelist short-circuiting is the caller's responsibility.
    pub fn is_banned(&self, username: &str) -> Option<RuleHit> {
        if let Some(id) = self.exact.get(username)
            && let Some(rule) = self.rules.get(id)
        {
            return Some(hit(rule));
        }

        self.rules
            .values()
            .find(|rule| match &rule.pattern {
                CompiledPattern::Pattern(regex) => regex.is_match(username),
                CompiledPattern::Exact(_) => false,
            })
            .map(hit)
    }
}

fn hit(rule: &CompiledRule) -> RuleHit {
    RuleHit {
        rule_id: rule.id,
        message: rule.message.clone(),
        extend_to_ban: rule.extend_to_ban,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i32, is_regex: bool, expr: &str) -> UsernameRule {
        UsernameRule {
            id,
            is_regex,
            expression: expr.to_string(),
            message: format!("rule {id}"),
            extend_to_ban: false,
            retired: false,
            created_at: Utc::now(),
            created_by: None,
            retired_by: None,
            retired_at: None,
        }
    }

    #[test]
    fn exact_rule_hits_literal_only() {
        let mut cache = RuleCache::new();
        cache.apply(&rule(1, false, "BadName"));

        let hit = cache.is_banned("BadName").unwrap();
        assert_eq!(hit.rule_id, 1);
        assert_eq!(hit.message, "rule 1");
        assert!(cache.is_banned("BadName2").is_none());
    }

    #[test]
    fn regex_rule_scanned() {
        let mut cache = RuleCache::new();
        cache.apply(&rule(2, true, "(?i)^grief"));
        assert!(cache.is_banned("GrieferMan").is_some());
        assert!(cache.is_banned("PeacefulMan").is_none());
    }

    #[test]
    fn retired_rule_removed_from_cache() {
        let mut cache = RuleCache::new();
        cache.apply(&rule(3, false, "BadName"));
        assert!(cache.is_banned("BadName").is_some());

        let mut retired = rule(3, false, "BadName");
        retired.retired = true;
        cache.apply(&retired);
        assert!(cache.is_banned("BadName").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_rule_clears_stale_exact_entry() {
        let mut cache = RuleCache::new();
        cache.apply(&rule(4, false, "OldName"));
        cache.apply(&rule(4, false, "NewName"));
        assert!(cache.is_banned("OldName").is_none());
        assert!(cache.is_banned("NewName").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalid_regex_skipped_not_fatal() {
        let mut cache = RuleCache::new();
        cache.apply(&rule(5, true, "(unclosed"));
        assert!(cache.is_empty());
    }

    #[test]
    fn extend_to_ban_carried_through() {
        let mut cache = RuleCache::new();
        let mut r = rule(6, false, "Spammer");
        r.extend_to_ban = true;
        cache.apply(&r);
        assert!(cache.is_banned("Spammer").unwrap().extend_to_ban);
    }
}
