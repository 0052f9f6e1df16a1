// Error kinds for the control plane

use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the control plane recognizes.
///
/// Watcher, sync subscriber and discovery log-and-continue on everything
/// except `Fatal`; the authorization check, dispatch and config resolver
/// propagate.
#[derive(Debug, Error)]
pub enum Error {
    /// A looked-up entity, file, or config key is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation during upsert (duplicate name-in-scope)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed decorator arguments, bad config value, hash mismatch
    #[error("validation error: {0}")]
    Validation(String),

    /// Secret decrypt failed; ciphertext is never returned in its place
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Authorization check returned false
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Redis/MQ/S3 unavailability; the offending step is best-effort
    #[error("transient error: {0}")]
    Transient(String),

    /// Database unavailability, corruption; surfaces as process failure
    #[error("fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Error::Decryption(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    /// Stable tag for API error objects and execution records
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Validation(_) => "validation_error",
            Error::Decryption(_) => "decryption_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::Transient(_) => "transient",
            Error::Fatal(_) => "fatal",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // Unique violations surface as Conflict so duplicate name-in-scope
        // registrations are reportable instead of opaque 500s.
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("23505") {
                return Error::Conflict(db_err.message().to_string());
            }
        }
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".into()),
            other => Error::Fatal(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(Error::not_found("x").kind(), "not_found");
        assert_eq!(Error::conflict("x").kind(), "conflict");
        assert_eq!(Error::validation("x").kind(), "validation_error");
        assert_eq!(Error::decryption("x").kind(), "decryption_error");
        assert_eq!(Error::unauthorized("x").kind(), "unauthorized");
        assert_eq!(Error::transient("x").kind(), "transient");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
