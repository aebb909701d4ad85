use crate::driver::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Boxed error raised by application code inside a transaction body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Session pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Driver has been closed")]
    DriverClosed,

    #[error("Transaction was aborted by the transaction body")]
    TransactionAborted,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Transaction {} failed: {source}", .transaction_id.as_deref().unwrap_or("<none>"))]
    User {
        transaction_id: Option<String>,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, DriverError>;

impl DriverError {
    /// Wraps an application error so it can be returned from a transaction body.
    pub fn user<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::User {
            transaction_id: None,
            source: err.into(),
        }
    }

    /// The transport error behind this error, if any.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_occ_conflict(&self) -> bool {
        self.as_transport().is_some_and(TransportError::is_occ_conflict)
    }

    pub(crate) fn with_transaction_id(self, id: Option<&str>) -> Self {
        match self {
            Self::User {
                transaction_id: None,
                source,
            } => Self::User {
                transaction_id: id.map(str::to_string),
                source,
            },
            other => other,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DriverError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_user_error_keeps_source() {
        let err = DriverError::user(std::io::Error::other("disk on fire"))
            .with_transaction_id(Some("txn-1"));

        assert!(err.to_string().contains("txn-1"));
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn test_transaction_id_not_overwritten() {
        let err = DriverError::User {
            transaction_id: Some("first".into()),
            source: "boom".into(),
        }
        .with_transaction_id(Some("second"));

        match err {
            DriverError::User { transaction_id, .. } => {
                assert_eq!(transaction_id.as_deref(), Some("first"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_occ_detection() {
        let err = DriverError::from(TransportError::OccConflict("conflict".into()));
        assert!(err.is_occ_conflict());
        assert!(!DriverError::DriverClosed.is_occ_conflict());
    }
}
