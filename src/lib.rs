// ============================================================================
// rustqldb Library
// ============================================================================
//
// Client driver for a transactional ledger database. Transactions run on
// pooled server sessions, every statement feeds a commit digest that is
// checked against the ledger's own, and failed attempts are retried or
// recovered according to a retry policy.
//
// ============================================================================

pub mod core;
pub mod driver;
pub mod hash;
pub mod prelude;
pub mod result;
pub mod retry;
pub mod serialization;
pub mod session;
pub mod transaction;
pub mod transport;

// Re-export main types for convenience
pub use core::{DriverError, Result};
pub use driver::{BlockingDriver, DriverConfig, DriverConfigBuilder, QldbDriver};
pub use hash::QldbHash;
pub use transaction::{TransactionDisposition, TransactionExecutor};
pub use transport::{InMemoryLedger, LedgerTransport, TransportError};
