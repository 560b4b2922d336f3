//! Repository for username rules.

use super::DbError;
use crate::rules::UsernameRule;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

type RuleRow = (
    i32,                   // id
    bool,                  // is_regex
    String,                // expression
    String,                // message
    bool,                  // extend_to_ban
    bool,                  // retired
    DateTime<Utc>,         // created_at
    Option<Uuid>,          // created_by
    Option<Uuid>,          // retired_by
    Option<DateTime<Utc>>, // retired_at
);

const RULE_COLUMNS: &str =
    "id, is_regex, expression, message, extend_to_ban, retired, created_at, created_by, retired_by, retired_at";

/// Repository for username rule operations.
pub struct UsernameRuleRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> UsernameRuleRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i32) -> Result<Option<UsernameRule>, DbError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM username_rule WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(row_to_rule))
    }

    pub async fn add(&self, rule: &UsernameRule) -> Result<i32, DbError> {
        let (id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO username_rule (is_regex, expression, message, extend_to_ban,
                                       retired, created_at, created_by)
            VALUES ($1, $2, $3, $4, FALSE, $5, $6)
            RETURNING id
            "#,
        )
        .bind(rule.is_regex)
        .bind(&rule.expression)
        .bind(&rule.message)
        .bind(rule.extend_to_ban)
        .bind(rule.created_at)
        .bind(rule.created_by)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// Mark a rule retired and return the updated record.
    pub async fn retire(
        &self,
        id: i32,
        by: Option<Uuid>,
    ) -> Result<Option<UsernameRule>, DbError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            UPDATE username_rule
            SET retired = TRUE, retired_by = $2, retired_at = $3
            WHERE id = $1
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(by)
        .bind(Utc::now())
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(row_to_rule))
    }

    pub async fn all_active(&self) -> Result<Vec<UsernameRule>, DbError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM username_rule WHERE retired = FALSE"
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_rule).collect())
    }
}

fn row_to_rule(row: RuleRow) -> UsernameRule {
    let (
        id,
        is_regex,
        expression,
        message,
        extend_to_ban,
        retired,
        created_at,
        created_by,
        retired_by,
        retired_at,
    ) = row;
    UsernameRule {
        id,
        is_regex,
        expression,
        message,
        extend_to_ban,
        retired,
        created_at,
        created_by,
        retired_by,
        retired_at,
    }
}
