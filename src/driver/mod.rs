// ============================================================================
// Driver Module
// ============================================================================
//
// Entry point for applications. QldbDriver owns the session pool for one
// ledger and runs transaction bodies on it with the configured retry
// policy. BlockingDriver wraps it for synchronous callers.
//
// ============================================================================

pub mod blocking;
pub mod config;

pub use blocking::{BlockingDriver, BlockingTransactionExecutor};
pub use config::{ConfigError, DriverConfig, DriverConfigBuilder};

use crate::core::{DriverError, Result};
use crate::retry::RetryPolicy;
use crate::serialization::{JsonSerializer, ValueSerializer};
use crate::session::{PoolStats, SessionPool};
use crate::transaction::{TransactionDisposition, TransactionExecutor};
use crate::transport::LedgerTransport;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Statement behind [`QldbDriver::list_table_names`].
pub const TABLE_NAMES_QUERY: &str =
    "SELECT VALUE name FROM information_schema.user_tables WHERE status = 'ACTIVE'";

/// Ledger driver
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// # Examples
///
/// ```
/// use rustqldb::prelude::*;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let ledger = Arc::new(InMemoryLedger::new("vehicles"));
/// let config = DriverConfig::builder("vehicles").build()?;
/// let driver = QldbDriver::new(config, ledger)?;
///
/// let count = driver
///     .execute(|txn| async move {
///         txn.execute("CREATE TABLE Vehicle").await?;
///         Ok(TransactionDisposition::Commit(1))
///     })
///     .await?;
/// assert_eq!(count, 1);
/// driver.close().await;
/// # Ok::<(), DriverError>(())
/// # }).unwrap();
/// ```
pub struct QldbDriver {
    config: DriverConfig,
    pool: SessionPool,
}

impl QldbDriver {
    /// Create a driver that encodes values as JSON.
    pub fn new(config: DriverConfig, transport: Arc<dyn LedgerTransport>) -> Result<Self> {
        Self::with_serializer(config, transport, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        config: DriverConfig,
        transport: Arc<dyn LedgerTransport>,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Result<Self> {
        let pool = SessionPool::new(&config, transport, serializer)?;
        event!(
            Level::INFO,
            ledger = %config.ledger_name(),
            capacity = pool.capacity(),
            "driver created"
        );
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn ledger_name(&self) -> &str {
        self.config.ledger_name()
    }

    /// Run `body` in a transaction and return what it committed.
    ///
    /// # Errors
    /// `TransactionAborted` when the body returns
    /// [`TransactionDisposition::Abort`]; otherwise whatever
    /// [`execute_disposition`](Self::execute_disposition) returns.
    pub async fn execute<T, F, Fut>(&self, body: F) -> Result<T>
    where
        T: Send,
        F: FnMut(TransactionExecutor) -> Fut + Send,
        Fut: Future<Output = Result<TransactionDisposition<T>>> + Send,
    {
        self.execute_with_retry(body, self.config.retry_policy(), |_| {})
            .await
    }

    /// Run `body` in a transaction and report whether it committed or
    /// aborted.
    pub async fn execute_disposition<T, F, Fut>(&self, body: F) -> Result<TransactionDisposition<T>>
    where
        T: Send,
        F: FnMut(TransactionExecutor) -> Fut + Send,
        Fut: Future<Output = Result<TransactionDisposition<T>>> + Send,
    {
        self.run(body, self.config.retry_policy(), |_| {}).await
    }

    /// Like [`execute`](Self::execute) with a one-off retry policy.
    /// `on_retry` gets the retry number (starting at 1) before each retry.
    pub async fn execute_with_retry<T, F, Fut, R>(
        &self,
        body: F,
        policy: &RetryPolicy,
        on_retry: R,
    ) -> Result<T>
    where
        T: Send,
        F: FnMut(TransactionExecutor) -> Fut + Send,
        Fut: Future<Output = Result<TransactionDisposition<T>>> + Send,
        R: FnMut(u32) + Send,
    {
        match self.run(body, policy, on_retry).await? {
            TransactionDisposition::Commit(value) => Ok(value),
            TransactionDisposition::Abort => Err(DriverError::TransactionAborted),
        }
    }

    /// Names of the active tables in the ledger.
    pub async fn list_table_names(&self) -> Result<Vec<String>> {
        self.execute(|txn| async move {
            let result = txn.execute_and_buffer(TABLE_NAMES_QUERY, Vec::new()).await?;
            let names = result
                .iter()
                .map(|value| txn.deserialize::<String>(value))
                .collect::<Result<Vec<_>>>()?;
            Ok(TransactionDisposition::Commit(names))
        })
        .await
    }

    /// Close the pool. Later calls fail with `DriverClosed`. Calling it
    /// again does nothing.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    async fn run<T, F, Fut, R>(
        &self,
        body: F,
        policy: &RetryPolicy,
        on_retry: R,
    ) -> Result<TransactionDisposition<T>>
    where
        T: Send,
        F: FnMut(TransactionExecutor) -> Fut + Send,
        Fut: Future<Output = Result<TransactionDisposition<T>>> + Send,
        R: FnMut(u32) + Send,
    {
        if self.pool.is_closed() {
            return Err(DriverError::DriverClosed);
        }

        let span = info_span!(
            "driver.execute",
            ledger = %self.config.ledger_name(),
            max_retries = policy.max_retries()
        );
        self.pool.execute(body, policy, on_retry).instrument(span).await
    }
}

impl std::fmt::Debug for QldbDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QldbDriver")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}
