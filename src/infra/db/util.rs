use crate::application::repos::RepoError;

/// SQLSTATE raised when a value exceeds a `VARCHAR(n)` column.
const STRING_DATA_RIGHT_TRUNCATION: &str = "22001";

/// Translate driver failures into repository errors.
///
/// Check violations and malformed values become [`RepoError::InvalidInput`], which the
/// procedure layer reports as BAD_REQUEST on the `content` field.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Duplicate {
            constraint: db.constraint().unwrap_or("unknown").to_string(),
        },
        sqlx::Error::Database(db)
            if db.is_check_violation()
                || db.code().as_deref() == Some(STRING_DATA_RIGHT_TRUNCATION)
                || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}
