// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction is opened on a session, accepts statements while open and
// ends either committed (digest verified) or aborted. Both ends are terminal.
//
// ============================================================================

use std::fmt;

/// Transaction state
///
/// State transitions:
/// ```text
/// Open ──execute──> Open
///   │
///   ├──commit──> Committed
///   │
///   └──abort───> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction accepts statements
    Open,

    /// The ledger accepted the commit
    Committed,

    /// The transaction was abandoned and the ledger notified
    Aborted,
}

impl TransactionState {
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionState::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Open => write!(f, "OPEN"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}
