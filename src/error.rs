//! Error types surfaced to admin-facing callers.

use crate::db::DbError;
use crate::notify::NotifyError;
use thiserror::Error;

/// Errors from creating or retiring bans and username rules.
///
/// Validation failures are returned synchronously to the caller (the admin
/// command), never swallowed into the propagation pipeline.
#[derive(Debug, Error)]
pub enum BanError {
    #[error("ban must target at least one of user id, address range, or hardware id")]
    EmptyTargets,

    #[error("role ban must name at least one role")]
    EmptyRoles,

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("role name is ambiguous between multiple categories: {0}")]
    AmbiguousRole(String),

    #[error("invalid username rule pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("no such username rule: {0}")]
    NoSuchRule(i32),

    #[error("moderation engine is shutting down")]
    EngineClosed,

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}
