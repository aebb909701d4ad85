//! Everything an application needs to run transactions.
//!
//! ```
//! use rustqldb::prelude::*;
//! ```

pub use crate::core::{BoxError, DriverError, IoUsage, Result, TimingInformation, ValueHolder};
pub use crate::driver::{
    BlockingDriver, BlockingTransactionExecutor, ConfigError, DriverConfig, DriverConfigBuilder,
    QldbDriver,
};
pub use crate::result::{BufferedResult, ResultCursor, StatementResult};
pub use crate::retry::{BackoffStrategy, ExponentialBackoffStrategy, RetryContext, RetryPolicy};
pub use crate::serialization::{JsonSerializer, ValueSerializer};
pub use crate::session::PoolStats;
pub use crate::transaction::{TransactionDisposition, TransactionExecutor};
pub use crate::transport::{InMemoryLedger, LedgerTransport, TransportError};
