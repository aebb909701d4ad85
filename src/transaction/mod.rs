// ============================================================================
// Transaction Module
// ============================================================================
//
// A transaction lives on one session: start, statements, then commit with
// digest verification or abort. The executor is the handle application code
// receives inside a transaction body.
//
// ============================================================================

pub mod executor;
pub mod failure;
pub mod lifecycle;
pub mod state;

pub use executor::{TransactionDisposition, TransactionExecutor};
pub use failure::TransactionFailure;
pub use lifecycle::Transaction;
pub use state::TransactionState;
