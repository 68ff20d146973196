use chrono::NaiveDate;
use thiserror::Error;

/// Failures surfaced by the ledgers and roster operations. Each variant maps
/// to one wire error code.
#[derive(Debug, Error)]
pub enum SchoolError {
    #[error("{0}")]
    BadParams(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("cannot record attendance for a future date ({date})")]
    FutureDate { date: NaiveDate },

    #[error("score {value} is outside 0..=100")]
    OutOfRange { value: f64 },

    #[error("QR token is invalid or expired")]
    InvalidOrExpiredToken,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

pub type SchoolResult<T> = Result<T, SchoolError>;

impl SchoolError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::DuplicateEntry(_) => "duplicate_entry",
            Self::FutureDate { .. } => "future_date",
            Self::OutOfRange { .. } => "out_of_range",
            Self::InvalidOrExpiredToken => "invalid_or_expired_token",
            Self::Conflict(_) => "conflict",
            Self::Db(_) => "db_query_failed",
        }
    }
}

/// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY
/// constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Maps a unique-constraint failure to `DuplicateEntry`, everything else to
/// `Db`.
pub fn unique_or_db(e: rusqlite::Error, what: impl FnOnce() -> String) -> SchoolError {
    if is_unique_violation(&e) {
        SchoolError::DuplicateEntry(what())
    } else {
        SchoolError::Db(e)
    }
}
