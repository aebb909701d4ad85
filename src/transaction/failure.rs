use crate::core::DriverError;
use std::fmt;

/// A failed transaction attempt, tagged with what the pool needs to know to
/// clean up after it.
#[derive(Debug)]
pub struct TransactionFailure {
    pub error: DriverError,
    pub transaction_id: Option<String>,
    /// Whether the session can still be reused.
    pub session_alive: bool,
}

impl TransactionFailure {
    pub fn new(error: DriverError, transaction_id: Option<String>, session_alive: bool) -> Self {
        let error = error.with_transaction_id(transaction_id.as_deref());
        Self {
            error,
            transaction_id,
            session_alive,
        }
    }

    /// The original error, with the wrapper dropped.
    pub fn into_error(self) -> DriverError {
        self.error
    }
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transaction_id {
            Some(id) => write!(f, "transaction {}: {}", id, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for TransactionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
