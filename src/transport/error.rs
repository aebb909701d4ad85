use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref TRANSACTION_EXPIRED: Regex =
        Regex::new(r"Transaction\s.*\shas\sexpired").expect("valid expiry pattern");
}

/// Failure reported by the transport, already classified by kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("OCC conflict: {0}")]
    OccConflict(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Request throttling. Not transient: retrying right away keeps the
    /// caller over its rate, so it fails the transaction.
    #[error("Rate exceeded: {0}")]
    RateExceeded(String),

    #[error("Service error ({status_code}): {message}")]
    Service { status_code: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(String),
}

impl TransportError {
    pub fn is_occ_conflict(&self) -> bool {
        matches!(self, Self::OccConflict(_))
    }

    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Self::InvalidSession(_))
    }

    /// An invalid-session error caused by the transaction outliving its
    /// server-side time limit. Retrying cannot succeed.
    pub fn is_transaction_expiry(&self) -> bool {
        match self {
            Self::InvalidSession(message) => TRANSACTION_EXPIRED.is_match(message),
            _ => false,
        }
    }

    /// Faults that may clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CapacityExceeded(_) | Self::Connection(_) => true,
            Self::Service { status_code, .. } => matches!(status_code, 500 | 503),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_expiry_pattern() {
        let expired =
            TransportError::InvalidSession("Transaction 4yl2Gy0hZ4A has expired".into());
        assert!(expired.is_invalid_session());
        assert!(expired.is_transaction_expiry());

        let closed = TransportError::InvalidSession("Session has been closed".into());
        assert!(!closed.is_transaction_expiry());

        let not_session = TransportError::BadRequest("Transaction abc has expired".into());
        assert!(!not_session.is_transaction_expiry());
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::CapacityExceeded("busy".into()).is_transient());
        assert!(TransportError::Connection("reset".into()).is_transient());
        assert!(
            TransportError::Service {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !TransportError::Service {
                status_code: 400,
                message: "nope".into()
            }
            .is_transient()
        );
        assert!(!TransportError::OccConflict("occ".into()).is_transient());
        assert!(!TransportError::BadRequest("bad".into()).is_transient());
    }

    #[test]
    fn test_rate_exceeded_matches_no_retry_class() {
        let throttled = TransportError::RateExceeded("slow down".into());
        assert!(!throttled.is_transient());
        assert!(!throttled.is_occ_conflict());
        assert!(!throttled.is_invalid_session());
    }
}
