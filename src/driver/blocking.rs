use super::{DriverConfig, QldbDriver};
use crate::core::{DriverError, Result, ValueHolder};
use crate::result::BufferedResult;
use crate::retry::RetryPolicy;
use crate::serialization::{JsonSerializer, ValueSerializer};
use crate::session::PoolStats;
use crate::transaction::{TransactionDisposition, TransactionExecutor};
use crate::transport::LedgerTransport;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

/// Synchronous front end for [`QldbDriver`].
///
/// Owns a multi-thread tokio runtime. Must not be used or dropped from
/// inside an async context.
pub struct BlockingDriver {
    runtime: Runtime,
    driver: QldbDriver,
}

impl BlockingDriver {
    pub fn new(config: DriverConfig, transport: Arc<dyn LedgerTransport>) -> Result<Self> {
        Self::with_serializer(config, transport, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        config: DriverConfig,
        transport: Arc<dyn LedgerTransport>,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("qldb-driver")
            .build()
            .map_err(|err| DriverError::Runtime(err.to_string()))?;
        let driver = QldbDriver::with_serializer(config, transport, serializer)?;
        Ok(Self { runtime, driver })
    }

    pub fn config(&self) -> &DriverConfig {
        self.driver.config()
    }

    /// The async driver underneath.
    pub fn driver(&self) -> &QldbDriver {
        &self.driver
    }

    pub fn execute<T, F>(&self, body: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut BlockingTransactionExecutor) -> Result<TransactionDisposition<T>> + Send,
    {
        self.execute_with_retry(body, self.driver.config().retry_policy(), |_| {})
    }

    pub fn execute_disposition<T, F>(&self, mut body: F) -> Result<TransactionDisposition<T>>
    where
        T: Send,
        F: FnMut(&mut BlockingTransactionExecutor) -> Result<TransactionDisposition<T>> + Send,
    {
        self.runtime
            .block_on(self.driver.execute_disposition(|txn| {
                let outcome = run_blocking(&mut body, txn);
                async move { outcome }
            }))
    }

    pub fn execute_with_retry<T, F, R>(
        &self,
        mut body: F,
        policy: &RetryPolicy,
        on_retry: R,
    ) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut BlockingTransactionExecutor) -> Result<TransactionDisposition<T>> + Send,
        R: FnMut(u32) + Send,
    {
        self.runtime.block_on(self.driver.execute_with_retry(
            |txn| {
                let outcome = run_blocking(&mut body, txn);
                async move { outcome }
            },
            policy,
            on_retry,
        ))
    }

    pub fn list_table_names(&self) -> Result<Vec<String>> {
        self.runtime.block_on(self.driver.list_table_names())
    }

    pub fn close(&self) {
        self.runtime.block_on(self.driver.close());
    }

    pub fn stats(&self) -> PoolStats {
        self.driver.stats()
    }
}

impl std::fmt::Debug for BlockingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDriver")
            .field("driver", &self.driver)
            .finish()
    }
}

/// Runs a synchronous body from inside the async retry loop. The body is
/// allowed to block on statements because the worker steps out of the
/// runtime for its duration.
fn run_blocking<T, F>(body: &mut F, executor: TransactionExecutor) -> Result<TransactionDisposition<T>>
where
    F: FnMut(&mut BlockingTransactionExecutor) -> Result<TransactionDisposition<T>>,
{
    let handle = Handle::current();
    tokio::task::block_in_place(|| {
        let mut executor = BlockingTransactionExecutor {
            inner: executor,
            handle,
        };
        body(&mut executor)
    })
}

/// Statement handle for synchronous transaction bodies. Every statement is
/// read to the end before it returns.
pub struct BlockingTransactionExecutor {
    inner: TransactionExecutor,
    handle: Handle,
}

impl BlockingTransactionExecutor {
    pub fn transaction_id(&self) -> &str {
        self.inner.transaction_id()
    }

    pub fn execute(&self, statement: &str) -> Result<BufferedResult> {
        self.execute_with(statement, Vec::new())
    }

    pub fn execute_with(&self, statement: &str, parameters: Vec<ValueHolder>) -> Result<BufferedResult> {
        self.handle
            .block_on(self.inner.execute_and_buffer(statement, parameters))
    }

    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<ValueHolder> {
        self.inner.serialize(value)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, holder: &ValueHolder) -> Result<T> {
        self.inner.deserialize(holder)
    }
}

impl std::fmt::Debug for BlockingTransactionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingTransactionExecutor")
            .field("transaction_id", &self.inner.transaction_id())
            .finish()
    }
}
