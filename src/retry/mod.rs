// ============================================================================
// Retry Module
// ============================================================================
//
// Decides what happens after a transaction attempt fails: retry on the same
// session with backoff, replace the session and try again, or give up.
//
// ============================================================================

pub mod handler;
pub mod policy;

pub use handler::{RetryDisposition, RetryHandler, RetryTarget, classify};
pub use policy::{
    BackoffStrategy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_RETRIES,
    ExponentialBackoffStrategy, RetryContext, RetryPolicy,
};
