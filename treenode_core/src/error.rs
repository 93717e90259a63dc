use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("move would create a cycle: target lies inside the moved node's own subtree")]
    CyclicMove,

    #[error("sibling count would exceed BASE ({base})")]
    SiblingOverflow { base: i64 },

    #[error("priority {priority} outside [0, {max}]")]
    InvalidPriority { priority: i64, max: i64 },

    #[error("unknown position: {0}")]
    UnknownPosition(String),

    #[error("node not found: {0}")]
    NodeNotFound(i64),

    #[error("row lock unavailable, rebuild skipped")]
    LockUnavailable,

    #[error("invalid tree data: {0}")]
    InvalidTreeData(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

pub type TreeResult<T> = Result<T, Error>;
