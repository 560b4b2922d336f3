//! Repository for server identity rows.

use super::DbError;
use sqlx::PgPool;

/// Repository mapping fleet-unique server names to row ids.
pub struct ServerRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ServerRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a server name to its id, creating the row on first run.
    ///
    /// The dummy update makes `RETURNING` yield the id on the conflict
    /// path as well.
    pub async fn resolve(&self, name: &str) -> Result<i32, DbError> {
        let (id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO server (name) VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }
}
