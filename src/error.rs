//! Error taxonomy shared by every task: conflicts are expected and swallowed, transient
//! failures are retried, invariant violations are bugs and propagate.

use thiserror::Error;

/// Postgres `unique_violation`.
const PG_UNIQUE_VIOLATION: &str = "23505";
/// Postgres `exclusion_violation`, raised by the LAC/station upsert's exclusion constraints.
const PG_EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Debug, Error)]
pub enum TaskError {
    /// Another worker already holds or has already made this change; safe to drop.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Worth a retry: a dropped connection, a statement timeout, an object-store hiccup.
    #[error("transient failure: {0}")]
    Transient(#[from] anyhow::Error),

    /// A state the code assumes can't happen. Never retried, never swallowed.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if let Some(code) = db_err.code() {
                if code == PG_UNIQUE_VIOLATION || code == PG_EXCLUSION_VIOLATION {
                    return TaskError::Conflict(db_err.message().to_string());
                }
            }
        }
        TaskError::Transient(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_prefixed_by_kind() {
        let e = TaskError::Invariant("station had no measures".into());
        assert!(e.to_string().starts_with("invariant violation:"));
    }
}
