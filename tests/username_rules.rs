//! Fleet-wide username rules.
//!
//! Rules created on one server must be checkable on every other server,
//! and retirement must clear them fleet-wide.

mod common;

use common::{TestFleet, eventually};
use wardend::enforce::UsernameRuleDraft;
use wardend::error::BanError;

fn exact_rule(expression: &str, message: &str) -> UsernameRuleDraft {
    UsernameRuleDraft {
        is_regex: false,
        expression: expression.to_string(),
        message: message.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn exact_rule_applies_fleet_wide() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;
    let beta = fleet.spawn_server("beta").await;

    let rule = alpha
        .create_username_rule(exact_rule("BadName", "pick another name"))
        .await
        .unwrap();
    assert!(rule.id > 0);

    // Local apply is ordered with the check through the same queue.
    let hit = alpha.is_username_banned("BadName", false).await.unwrap();
    let hit = hit.expect("rule matches on creator");
    assert_eq!(hit.rule_id, rule.id);
    assert_eq!(hit.message, "pick another name");
    assert!(alpha.is_username_banned("GoodName", false).await.unwrap().is_none());

    // The other server learns via notification.
    let propagated = eventually(|| async {
        beta.is_username_banned("BadName", false)
            .await
            .unwrap()
            .is_some()
    })
    .await;
    assert!(propagated, "rule never reached the other server");
}

#[tokio::test]
async fn retiring_rule_clears_it_fleet_wide() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;
    let beta = fleet.spawn_server("beta").await;

    let rule = alpha
        .create_username_rule(exact_rule("BadName", "no"))
        .await
        .unwrap();
    assert!(
        eventually(|| async {
            beta.is_username_banned("BadName", false)
                .await
                .unwrap()
                .is_some()
        })
        .await
    );

    alpha.retire_username_rule(rule.id, None).await.unwrap();

    assert!(alpha.is_username_banned("BadName", false).await.unwrap().is_none());
    assert!(
        eventually(|| async {
            beta.is_username_banned("BadName", false)
                .await
                .unwrap()
                .is_none()
        })
        .await
    );
}

#[tokio::test]
async fn regex_rule_matches_patterns() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;

    alpha
        .create_username_rule(UsernameRuleDraft {
            is_regex: true,
            expression: "(?i)^grief".to_string(),
            message: "no griefer names".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(alpha.is_username_banned("GrieferMan", false).await.unwrap().is_some());
    assert!(alpha.is_username_banned("griefking", false).await.unwrap().is_some());
    assert!(alpha.is_username_banned("Peaceful", false).await.unwrap().is_none());
}

#[tokio::test]
async fn whitelisted_player_short_circuits() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;

    alpha
        .create_username_rule(exact_rule("BadName", "no"))
        .await
        .unwrap();

    assert!(alpha.is_username_banned("BadName", true).await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_regex_rejected_synchronously() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;

    let err = alpha
        .create_username_rule(UsernameRuleDraft {
            is_regex: true,
            expression: "(unclosed".to_string(),
            message: "never stored".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BanError::InvalidPattern(_)));
}

#[tokio::test]
async fn retiring_unknown_rule_errors() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;

    let err = alpha.retire_username_rule(9999, None).await.unwrap_err();
    assert!(matches!(err, BanError::NoSuchRule(9999)));
}

#[tokio::test]
async fn extend_to_ban_flag_carried_in_hit() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;

    alpha
        .create_username_rule(UsernameRuleDraft {
            is_regex: false,
            expression: "Spammer".to_string(),
            message: "spam name".to_string(),
            extend_to_ban: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let hit = alpha
        .is_username_banned("Spammer", false)
        .await
        .unwrap()
        .expect("rule matches");
    assert!(hit.extend_to_ban);
}

#[tokio::test]
async fn late_joining_server_primes_rules_from_store() {
    let fleet = TestFleet::new();
    let alpha = fleet.spawn_server("alpha").await;

    alpha
        .create_username_rule(exact_rule("BadName", "no"))
        .await
        .unwrap();

    // A server started after the rule exists never saw the notification;
    // it primes its cache from the store at startup.
    let gamma = fleet.spawn_server("gamma").await;
    assert!(gamma.is_username_banned("BadName", false).await.unwrap().is_some());
}
