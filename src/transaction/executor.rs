use super::Transaction;
use crate::core::{Result, ValueHolder};
use crate::result::{BufferedResult, StatementResult};
use crate::serialization::{ValueSerializer, from_holder, to_holder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a transaction body asks the driver to do once it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionDisposition<T> {
    /// Commit the transaction and hand `T` back to the caller.
    Commit(T),
    /// Abort the transaction.
    Abort,
}

impl<T> TransactionDisposition<T> {
    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit(_))
    }

    pub fn committed(self) -> Option<T> {
        match self {
            Self::Commit(value) => Some(value),
            Self::Abort => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransactionDisposition<U> {
        match self {
            Self::Commit(value) => TransactionDisposition::Commit(f(value)),
            Self::Abort => TransactionDisposition::Abort,
        }
    }
}

/// Handle passed to a transaction body for running statements.
///
/// Cloning is cheap; all clones drive the same transaction and statements
/// run one at a time in the order they are awaited.
#[derive(Clone)]
pub struct TransactionExecutor {
    transaction: Arc<Mutex<Transaction>>,
    transaction_id: Arc<str>,
    serializer: Arc<dyn ValueSerializer>,
}

impl TransactionExecutor {
    pub(crate) fn new(
        transaction: Arc<Mutex<Transaction>>,
        transaction_id: &str,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Self {
        Self {
            transaction,
            transaction_id: Arc::from(transaction_id),
            serializer,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub async fn execute(&self, statement: &str) -> Result<StatementResult> {
        self.execute_with(statement, Vec::new()).await
    }

    pub async fn execute_with(
        &self,
        statement: &str,
        parameters: Vec<ValueHolder>,
    ) -> Result<StatementResult> {
        let mut transaction = self.transaction.lock().await;
        transaction.execute(statement, parameters).await
    }

    /// Execute and read every page before returning.
    pub async fn execute_and_buffer(
        &self,
        statement: &str,
        parameters: Vec<ValueHolder>,
    ) -> Result<BufferedResult> {
        let mut transaction = self.transaction.lock().await;
        let result = transaction.execute(statement, parameters).await?;
        result.buffer().await
    }

    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<ValueHolder> {
        to_holder(self.serializer.as_ref(), value)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, holder: &ValueHolder) -> Result<T> {
        from_holder(self.serializer.as_ref(), holder)
    }

    pub fn serializer(&self) -> &dyn ValueSerializer {
        self.serializer.as_ref()
    }
}

impl std::fmt::Debug for TransactionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::JsonSerializer;
    use crate::session::Session;
    use crate::transport::{InMemoryLedger, LedgerTransport};

    #[test]
    fn test_disposition_helpers() {
        let commit = TransactionDisposition::Commit(2);
        assert!(commit.is_commit());
        assert_eq!(commit.clone().map(|v| v * 2), TransactionDisposition::Commit(4));
        assert_eq!(commit.committed(), Some(2));
        assert_eq!(TransactionDisposition::<i32>::Abort.committed(), None);
    }

    #[tokio::test]
    async fn test_executor_runs_statements_with_params() {
        let ledger = Arc::new(InMemoryLedger::new("books").with_handler(|_, params| {
            Ok(params.to_vec())
        }));
        let transport: Arc<dyn LedgerTransport> = ledger.clone();
        let session = Arc::new(Session::start(transport, "books").await.unwrap());
        let txn = Transaction::start(session).await.unwrap();
        let id = txn.id().to_string();
        let executor =
            TransactionExecutor::new(Arc::new(Mutex::new(txn)), &id, Arc::new(JsonSerializer));

        let param = executor.serialize(&"VIN-1").unwrap();
        let result = executor
            .execute_and_buffer("SELECT * FROM cars WHERE vin = ?", vec![param])
            .await
            .unwrap();

        let vin: String = executor.deserialize(&result.values()[0]).unwrap();
        assert_eq!(vin, "VIN-1");
        assert_eq!(executor.transaction_id(), id);
    }
}
