// ============================================================================
// In-Memory Ledger
// ============================================================================
//
// A LedgerTransport that plays the server role entirely in memory. It keeps
// sessions and open transactions, pages statement results, computes the
// server-side commit digest with the same QldbHash rules as the driver and
// lets tests inject faults per command kind.
//
// ============================================================================

use super::{Command, CommandKind, CommandRequest, CommandResponse, LedgerTransport, TransportError};
use crate::core::{IoUsage, Page, TimingInformation, ValueHolder};
use crate::hash::QldbHash;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Produces the result values of a statement.
pub type StatementHandler =
    Arc<dyn Fn(&str, &[ValueHolder]) -> Result<Vec<ValueHolder>, TransportError> + Send + Sync>;

/// A transaction that reached the ledger's journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    pub transaction_id: String,
    pub statements: Vec<String>,
}

pub struct InMemoryLedger {
    ledger_name: String,
    page_size: usize,
    max_connections: usize,
    report_stats: bool,
    latency: Option<Duration>,
    handler: StatementHandler,
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    sessions: HashMap<String, SessionState>,
    faults: HashMap<CommandKind, VecDeque<TransportError>>,
    command_counts: HashMap<CommandKind, usize>,
    corrupt_commits: usize,
    misreported_commit_ids: usize,
    sessions_started: usize,
    sessions_ended: usize,
    committed: Vec<CommittedTransaction>,
}

#[derive(Default)]
struct SessionState {
    transaction: Option<OpenTransaction>,
}

struct OpenTransaction {
    id: String,
    digest: QldbHash,
    statements: Vec<String>,
    pending_pages: HashMap<String, Vec<ValueHolder>>,
}

impl OpenTransaction {
    fn new(id: String) -> Self {
        Self {
            digest: QldbHash::of_str(&id),
            id,
            statements: Vec::new(),
            pending_pages: HashMap::new(),
        }
    }

    /// Splits `values` into the first page and parks the remainder under a
    /// fresh page token.
    fn paginate(&mut self, mut values: Vec<ValueHolder>, page_size: usize) -> Page {
        if values.len() <= page_size {
            return Page::new(values, None);
        }

        let rest = values.split_off(page_size);
        let token = Uuid::new_v4().simple().to_string();
        self.pending_pages.insert(token.clone(), rest);
        Page::new(values, Some(token))
    }
}

impl InMemoryLedger {
    pub fn new(ledger_name: &str) -> Self {
        Self {
            ledger_name: ledger_name.to_string(),
            page_size: 200,
            max_connections: super::DEFAULT_MAX_CONNECTIONS,
            report_stats: true,
            latency: None,
            handler: Arc::new(|_, _| Ok(Vec::new())),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Set the number of values returned per page
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the connection limit reported to the driver
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Delay every command by `latency`
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stop reporting IO usage and timing information
    pub fn without_stats(mut self) -> Self {
        self.report_stats = false;
        self
    }

    /// Install the function that answers statements
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[ValueHolder]) -> Result<Vec<ValueHolder>, TransportError>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    pub fn ledger_name(&self) -> &str {
        &self.ledger_name
    }

    /// Fail the next command of `kind` with `error`. Faults queue up and are
    /// consumed one per command. An injected invalid-session fault also
    /// drops the session on the ledger side.
    pub fn inject_fault(&self, kind: CommandKind, error: TransportError) {
        self.state()
            .faults
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Make the next `count` commits answer with a tampered digest.
    pub fn corrupt_next_commits(&self, count: usize) {
        self.state().corrupt_commits += count;
    }

    /// Make the next `count` commits answer for a different transaction id.
    pub fn misreport_next_commit_ids(&self, count: usize) {
        self.state().misreported_commit_ids += count;
    }

    /// Forget every open session, as if they all timed out server-side.
    pub fn invalidate_all_sessions(&self) {
        self.state().sessions.clear();
    }

    pub fn command_count(&self, kind: CommandKind) -> usize {
        self.state()
            .command_counts
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn sessions_started(&self) -> usize {
        self.state().sessions_started
    }

    pub fn sessions_ended(&self) -> usize {
        self.state().sessions_ended
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn committed_transactions(&self) -> Vec<CommittedTransaction> {
        self.state().committed.clone()
    }

    /// The digest the ledger would verify for an open transaction.
    pub fn expected_digest(&self, session_token: &str) -> Option<QldbHash> {
        self.state()
            .sessions
            .get(session_token)
            .and_then(|session| session.transaction.as_ref())
            .map(|txn| txn.digest.clone())
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timing(&self) -> Option<TimingInformation> {
        self.report_stats.then(|| TimingInformation::new(1))
    }

    fn io_usage(&self, read_ios: usize, write_ios: usize) -> Option<IoUsage> {
        self.report_stats
            .then(|| IoUsage::new(read_ios as u64, write_ios as u64))
    }

    /// Counts the command and pops an injected fault for it, if any.
    fn take_fault(
        state: &mut LedgerState,
        kind: CommandKind,
        session_token: Option<&str>,
    ) -> Option<TransportError> {
        *state.command_counts.entry(kind).or_default() += 1;

        let fault = state.faults.get_mut(&kind).and_then(VecDeque::pop_front)?;
        if let (TransportError::InvalidSession(_), Some(token)) = (&fault, session_token) {
            state.sessions.remove(token);
        }
        Some(fault)
    }

    fn open_transaction<'s>(
        state: &'s mut LedgerState,
        session_token: &str,
        transaction_id: &str,
    ) -> Result<&'s mut OpenTransaction, TransportError> {
        let session = state
            .sessions
            .get_mut(session_token)
            .ok_or_else(|| TransportError::InvalidSession(format!("Session {session_token} not found")))?;

        match session.transaction.as_mut() {
            Some(txn) if txn.id == transaction_id => Ok(txn),
            _ => Err(TransportError::BadRequest(format!(
                "Transaction {transaction_id} is not open on this session"
            ))),
        }
    }

    fn execute_statement(
        &self,
        token: &str,
        transaction_id: String,
        statement: String,
        parameters: Vec<ValueHolder>,
    ) -> Result<CommandResponse, TransportError> {
        {
            let mut state = self.state();
            let txn = Self::open_transaction(&mut state, token, &transaction_id)?;
            txn.digest = txn
                .digest
                .dot(&QldbHash::of_statement(&statement, &parameters));
            txn.statements.push(statement.clone());
        }

        // The handler runs without the state lock held.
        let values = (self.handler)(&statement, &parameters)?;
        let read_ios = values.len();

        let mut state = self.state();
        let txn = Self::open_transaction(&mut state, token, &transaction_id)?;
        let first_page = txn.paginate(values, self.page_size);

        Ok(CommandResponse::ExecuteStatement {
            first_page,
            consumed_ios: self.io_usage(read_ios, 0),
            timing: self.timing(),
        })
    }

    fn fetch_page(
        &self,
        token: &str,
        transaction_id: &str,
        next_page_token: &str,
    ) -> Result<CommandResponse, TransportError> {
        let mut state = self.state();
        let txn = Self::open_transaction(&mut state, token, transaction_id)?;
        let values = txn.pending_pages.remove(next_page_token).ok_or_else(|| {
            TransportError::BadRequest(format!("Unknown page token {next_page_token}"))
        })?;
        let read_ios = values.len().min(self.page_size);
        let page = txn.paginate(values, self.page_size);

        Ok(CommandResponse::FetchPage {
            page,
            consumed_ios: self.io_usage(read_ios, 0),
            timing: self.timing(),
        })
    }

    fn commit(
        &self,
        token: &str,
        transaction_id: &str,
    ) -> Result<CommandResponse, TransportError> {
        let mut state = self.state();
        let txn = Self::open_transaction(&mut state, token, transaction_id)?;
        let mut digest = txn.digest.as_bytes().to_vec();
        let committed = CommittedTransaction {
            transaction_id: txn.id.clone(),
            statements: std::mem::take(&mut txn.statements),
        };
        let write_ios = committed.statements.len();

        if let Some(session) = state.sessions.get_mut(token) {
            session.transaction = None;
        }
        if state.corrupt_commits > 0 {
            state.corrupt_commits -= 1;
            if let Some(first) = digest.first_mut() {
                *first ^= 0xff;
            }
        }
        let mut reported_id = transaction_id.to_string();
        if state.misreported_commit_ids > 0 {
            state.misreported_commit_ids -= 1;
            reported_id = Uuid::new_v4().simple().to_string();
        }
        state.committed.push(committed);

        Ok(CommandResponse::CommitTransaction {
            transaction_id: reported_id,
            commit_digest: digest,
            consumed_ios: self.io_usage(0, write_ios),
            timing: self.timing(),
        })
    }
}

#[async_trait]
impl LedgerTransport for InMemoryLedger {
    async fn start_session(&self, ledger: &str) -> Result<String, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if let Some(fault) = Self::take_fault(&mut state, CommandKind::StartSession, None) {
            return Err(fault);
        }
        if ledger != self.ledger_name {
            return Err(TransportError::BadRequest(format!("Ledger {ledger} does not exist")));
        }

        let token = Uuid::new_v4().to_string();
        state.sessions.insert(token.clone(), SessionState::default());
        state.sessions_started += 1;
        Ok(token)
    }

    async fn send_command(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let CommandRequest {
            session_token: token,
            command,
        } = request;

        {
            let mut state = self.state();
            if let Some(fault) = Self::take_fault(&mut state, command.kind(), Some(&token)) {
                return Err(fault);
            }
            if !state.sessions.contains_key(&token) {
                return Err(TransportError::InvalidSession(format!("Session {token} not found")));
            }
        }

        match command {
            Command::StartTransaction => {
                let id = Uuid::new_v4().simple().to_string();
                let mut state = self.state();
                if let Some(session) = state.sessions.get_mut(&token) {
                    session.transaction = Some(OpenTransaction::new(id.clone()));
                }
                Ok(CommandResponse::StartTransaction {
                    transaction_id: id,
                    timing: self.timing(),
                })
            }
            Command::ExecuteStatement {
                transaction_id,
                statement,
                parameters,
            } => self.execute_statement(&token, transaction_id, statement, parameters),
            Command::FetchPage {
                transaction_id,
                next_page_token,
            } => self.fetch_page(&token, &transaction_id, &next_page_token),
            Command::CommitTransaction { transaction_id, .. } => {
                self.commit(&token, &transaction_id)
            }
            Command::AbortTransaction => {
                let mut state = self.state();
                if let Some(session) = state.sessions.get_mut(&token) {
                    session.transaction = None;
                }
                Ok(CommandResponse::AbortTransaction {
                    timing: self.timing(),
                })
            }
            Command::EndSession => {
                let mut state = self.state();
                state.sessions.remove(&token);
                state.sessions_ended += 1;
                Ok(CommandResponse::EndSession {
                    timing: self.timing(),
                })
            }
        }
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(token: &str, command: Command) -> CommandRequest {
        CommandRequest {
            session_token: token.to_string(),
            command,
        }
    }

    async fn start_transaction(ledger: &InMemoryLedger, token: &str) -> String {
        match ledger
            .send_command(request(token, Command::StartTransaction))
            .await
            .unwrap()
        {
            CommandResponse::StartTransaction { transaction_id, .. } => transaction_id,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_ledger_is_rejected() {
        let ledger = InMemoryLedger::new("books");
        let result = ledger.start_session("other").await;
        assert!(matches!(result, Err(TransportError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_results_are_paged() {
        let ledger = InMemoryLedger::new("books")
            .page_size(2)
            .with_handler(|_, _| {
                Ok((0..5u8).map(|i| ValueHolder::new(vec![i])).collect())
            });
        let token = ledger.start_session("books").await.unwrap();
        let txn = start_transaction(&ledger, &token).await;

        let response = ledger
            .send_command(request(
                &token,
                Command::ExecuteStatement {
                    transaction_id: txn.clone(),
                    statement: "SELECT * FROM t".into(),
                    parameters: vec![],
                },
            ))
            .await
            .unwrap();

        let CommandResponse::ExecuteStatement { first_page, .. } = response else {
            panic!("unexpected response");
        };
        assert_eq!(first_page.values.len(), 2);
        let next = first_page.next_page_token.unwrap();

        let response = ledger
            .send_command(request(
                &token,
                Command::FetchPage {
                    transaction_id: txn,
                    next_page_token: next,
                },
            ))
            .await
            .unwrap();
        let CommandResponse::FetchPage { page, .. } = response else {
            panic!("unexpected response");
        };
        assert_eq!(page.values.len(), 2);
        assert!(page.next_page_token.is_some());
    }

    #[tokio::test]
    async fn test_injected_invalid_session_drops_session() {
        let ledger = InMemoryLedger::new("books");
        let token = ledger.start_session("books").await.unwrap();
        ledger.inject_fault(
            CommandKind::StartTransaction,
            TransportError::InvalidSession("gone".into()),
        );

        let first = ledger
            .send_command(request(&token, Command::StartTransaction))
            .await;
        assert!(matches!(first, Err(TransportError::InvalidSession(_))));
        assert_eq!(ledger.open_sessions(), 0);

        let second = ledger
            .send_command(request(&token, Command::StartTransaction))
            .await;
        assert!(matches!(second, Err(TransportError::InvalidSession(_))));
        assert_eq!(ledger.command_count(CommandKind::StartTransaction), 2);
    }

    #[tokio::test]
    async fn test_commit_returns_server_digest() {
        let ledger = InMemoryLedger::new("books");
        let token = ledger.start_session("books").await.unwrap();
        let txn = start_transaction(&ledger, &token).await;

        let expected = QldbHash::of_str(&txn)
            .dot(&QldbHash::of_statement("CREATE TABLE t", &[]));
        ledger
            .send_command(request(
                &token,
                Command::ExecuteStatement {
                    transaction_id: txn.clone(),
                    statement: "CREATE TABLE t".into(),
                    parameters: vec![],
                },
            ))
            .await
            .unwrap();
        assert_eq!(ledger.expected_digest(&token), Some(expected.clone()));

        let response = ledger
            .send_command(request(
                &token,
                Command::CommitTransaction {
                    transaction_id: txn.clone(),
                    commit_digest: expected.as_bytes().to_vec(),
                },
            ))
            .await
            .unwrap();
        let CommandResponse::CommitTransaction { commit_digest, .. } = response else {
            panic!("unexpected response");
        };
        assert_eq!(commit_digest, expected.into_bytes());
        assert_eq!(ledger.committed_transactions().len(), 1);
        assert_eq!(ledger.committed_transactions()[0].transaction_id, txn);
    }
}
