use super::TransactionState;
use crate::core::{DriverError, Result, ValueHolder};
use crate::hash::QldbHash;
use crate::result::StatementResult;
use crate::session::Session;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One unit of work bound to a single session.
///
/// Every executed statement is folded into a running commit digest. On
/// commit the ledger answers with its own digest and the two must match
/// byte for byte.
#[derive(Debug)]
pub struct Transaction {
    session: Arc<Session>,
    id: String,
    digest: QldbHash,
    state: TransactionState,
    // Shared with every StatementResult so paging stops once this closes.
    open: Arc<AtomicBool>,
    statement_count: usize,
    started_at: Instant,
}

impl Transaction {
    /// Start a transaction on `session`
    pub async fn start(session: Arc<Session>) -> Result<Self> {
        let id = session.start_transaction().await?;
        debug!(session = %session.token(), transaction = %id, "transaction started");

        Ok(Self {
            digest: QldbHash::of_str(&id),
            session,
            id,
            state: TransactionState::Open,
            open: Arc::new(AtomicBool::new(true)),
            statement_count: 0,
            started_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// The locally accumulated commit digest
    pub fn digest(&self) -> &QldbHash {
        &self.digest
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn statement_count(&self) -> usize {
        self.statement_count
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Execute a statement
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty statement and `InvalidState`
    /// once the transaction is committed or aborted.
    pub async fn execute(
        &mut self,
        statement: &str,
        parameters: Vec<ValueHolder>,
    ) -> Result<StatementResult> {
        if statement.trim().is_empty() {
            return Err(DriverError::InvalidArgument(
                "statement must not be empty".into(),
            ));
        }
        self.ensure_open("execute")?;

        self.digest = self
            .digest
            .dot(&QldbHash::of_statement(statement, &parameters));
        self.statement_count += 1;

        let first = self
            .session
            .execute_statement(&self.id, statement, parameters)
            .await?;
        Ok(StatementResult::new(
            Arc::clone(&self.session),
            self.id.clone(),
            Arc::clone(&self.open),
            first,
        ))
    }

    /// Commit and verify the ledger's digest against the local one
    ///
    /// # Errors
    /// A digest or transaction id mismatch is reported as `Integrity`. The
    /// transaction counts as committed in that case since the ledger
    /// accepted it.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open("commit")?;

        let response = self
            .session
            .commit_transaction(&self.id, self.digest.as_bytes().to_vec())
            .await?;
        self.close(TransactionState::Committed);

        if response.transaction_id != self.id {
            return Err(DriverError::Integrity(format!(
                "commit response is for transaction {} but {} was committed",
                response.transaction_id, self.id
            )));
        }
        if response.commit_digest.as_slice() != self.digest.as_bytes() {
            return Err(DriverError::Integrity(format!(
                "commit digest mismatch for transaction {}",
                self.id
            )));
        }

        debug!(
            transaction = %self.id,
            statements = self.statement_count,
            elapsed_ms = self.duration().as_millis() as u64,
            "transaction committed"
        );
        Ok(())
    }

    /// Abort the transaction if it is still open. Calling it again does
    /// nothing. Transport failures are swallowed.
    pub async fn abort(&mut self) {
        self.try_abort().await;
    }

    /// Abort, reporting whether the ledger acknowledged it. A closed
    /// transaction counts as acknowledged.
    pub(crate) async fn try_abort(&mut self) -> bool {
        if !self.state.is_open() {
            return true;
        }
        self.close(TransactionState::Aborted);

        match self.session.abort_transaction().await {
            Ok(()) => {
                debug!(transaction = %self.id, "transaction aborted");
                true
            }
            Err(err) => {
                warn!(transaction = %self.id, error = %err, "failed to abort transaction");
                false
            }
        }
    }

    fn close(&mut self, state: TransactionState) {
        self.state = state;
        self.open.store(false, Ordering::SeqCst);
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(DriverError::InvalidState(format!(
                "Cannot {}: transaction {} is already {}",
                operation, self.id, self.state
            )))
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CommandKind, InMemoryLedger, LedgerTransport, TransportError};

    async fn open(ledger: &Arc<InMemoryLedger>) -> Transaction {
        let transport: Arc<dyn LedgerTransport> = ledger.clone();
        let session = Arc::new(Session::start(transport, "books").await.unwrap());
        Transaction::start(session).await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_matches_server_digest() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;

        txn.execute("CREATE TABLE cars", vec![]).await.unwrap();
        txn.execute("INSERT INTO cars ?", vec![ValueHolder::new(b"{}".to_vec())])
            .await
            .unwrap();

        let expected = ledger.expected_digest(txn.session().token()).unwrap();
        assert_eq!(txn.digest(), &expected);

        txn.commit().await.unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.statement_count(), 2);
    }

    #[tokio::test]
    async fn test_operations_after_commit_fail() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;
        txn.commit().await.unwrap();

        let err = txn.execute("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidState(_)));
        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_empty_statement_is_invalid_argument() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;

        let err = txn.execute("   ", vec![]).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
        assert!(txn.is_open());
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_integrity_error() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;
        txn.execute("DELETE FROM cars", vec![]).await.unwrap();
        ledger.corrupt_next_commits(1);

        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, DriverError::Integrity(_)));
        assert!(!err.is_occ_conflict());
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_commit_id_mismatch_is_integrity_error() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;
        txn.execute("DELETE FROM cars", vec![]).await.unwrap();
        ledger.misreport_next_commit_ids(1);

        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, DriverError::Integrity(_)));
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_results_stop_paging_once_closed() {
        let ledger = Arc::new(
            InMemoryLedger::new("books")
                .page_size(1)
                .with_handler(|_, _| Ok(vec![ValueHolder::new("1"), ValueHolder::new("2")])),
        );
        let mut committed = open(&ledger).await;
        let mut before_commit = committed.execute("SELECT * FROM cars", vec![]).await.unwrap();
        committed.commit().await.unwrap();

        let mut aborted = open(&ledger).await;
        let mut before_abort = aborted.execute("SELECT * FROM cars", vec![]).await.unwrap();
        aborted.abort().await;

        for result in [&mut before_commit, &mut before_abort] {
            let err = result.cursor().unwrap().try_collect().await.unwrap_err();
            assert!(matches!(err, DriverError::InvalidState(_)));
        }
        assert_eq!(ledger.command_count(CommandKind::FetchPage), 0);
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;

        txn.abort().await;
        txn.abort().await;

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(ledger.command_count(CommandKind::AbortTransaction), 1);
        let err = txn.execute("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_abort_swallows_transport_failure() {
        let ledger = Arc::new(InMemoryLedger::new("books"));
        let mut txn = open(&ledger).await;
        ledger.inject_fault(
            CommandKind::AbortTransaction,
            TransportError::Connection("reset".into()),
        );

        assert!(!txn.try_abort().await);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.try_abort().await);
    }
}
