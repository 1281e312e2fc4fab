use thiserror::Error;

/// Failures raised by the persistent store itself, independent of any
/// document type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error on `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid store key `{0}` (allowed: A-Z a-z 0-9 _ -)")]
    InvalidKey(String),
    #[error("store `{key}` is already open with another document type (requested {requested})")]
    TypeMismatch { key: String, requested: &'static str },
    #[error("store `{0}` is closed")]
    Closed(String),
}

impl StoreError {
    pub fn io(key: &str, source: std::io::Error) -> Self {
        Self::Io { key: key.to_string(), source }
    }
}

/// Outcome of a queued mutation that did not apply cleanly.
#[derive(Debug, Error)]
pub enum UpdateError<E> {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("mutation rejected: {0}")]
    Rejected(E),
    #[error("mutation panicked")]
    Panicked,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn not_found(entity: &str) -> Self { Self::NotFound(format!("{} not found", entity)) }

    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 1001,
            ServiceError::NotFound(_) => 1002,
            ServiceError::Conflict(_) => 1003,
            ServiceError::Unauthorized(_) => 1004,
            ServiceError::Upstream(_) => 1101,
            ServiceError::Internal(_) => 1201,
            ServiceError::Store(_) => 1202,
        }
    }
}

impl From<UpdateError<ServiceError>> for ServiceError {
    fn from(err: UpdateError<ServiceError>) -> Self {
        match err {
            UpdateError::Store(e) => ServiceError::Store(e),
            UpdateError::Rejected(e) => e,
            UpdateError::Panicked => ServiceError::Internal("mutation panicked".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_update_flattens_to_inner_error() {
        let err: ServiceError = UpdateError::Rejected(ServiceError::Conflict("dup".into())).into();
        assert!(matches!(err, ServiceError::Conflict(ref m) if m == "dup"));
        assert_eq!(err.code(), 1003);

        let err: ServiceError = UpdateError::<ServiceError>::Panicked.into();
        assert!(matches!(err, ServiceError::Internal(_)));
    }
}
