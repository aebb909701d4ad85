pub mod pool;

pub use pool::{PoolStats, PooledSession, SessionPool};

use crate::core::{DriverError, IoUsage, Page, Result, TimingInformation, ValueHolder};
use crate::transport::{Command, CommandKind, CommandRequest, CommandResponse, LedgerTransport};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One server-side session on a ledger.
///
/// A session runs transactions strictly one after another. The pool makes
/// sure a session is never handed to two callers at once; the session itself
/// does no locking.
pub struct Session {
    transport: Arc<dyn LedgerTransport>,
    ledger: String,
    token: String,
}

/// A page of values together with the statistics reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    pub page: Page,
    pub consumed_ios: Option<IoUsage>,
    pub timing: Option<TimingInformation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub transaction_id: String,
    pub commit_digest: Vec<u8>,
    pub consumed_ios: Option<IoUsage>,
    pub timing: Option<TimingInformation>,
}

impl Session {
    /// Open a new session on `ledger`
    pub async fn start(transport: Arc<dyn LedgerTransport>, ledger: &str) -> Result<Self> {
        let token = transport.start_session(ledger).await?;
        debug!(ledger, session = %token, "session started");

        Ok(Self {
            transport,
            ledger: ledger.to_string(),
            token,
        })
    }

    /// Server-assigned session token, which is also the session identity
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ledger(&self) -> &str {
        &self.ledger
    }

    pub async fn start_transaction(&self) -> Result<String> {
        match self.send(Command::StartTransaction).await? {
            CommandResponse::StartTransaction { transaction_id, .. } => Ok(transaction_id),
            other => Err(unexpected(CommandKind::StartTransaction, &other)),
        }
    }

    pub async fn execute_statement(
        &self,
        transaction_id: &str,
        statement: &str,
        parameters: Vec<ValueHolder>,
    ) -> Result<PageResult> {
        let command = Command::ExecuteStatement {
            transaction_id: transaction_id.to_string(),
            statement: statement.to_string(),
            parameters,
        };

        match self.send(command).await? {
            CommandResponse::ExecuteStatement {
                first_page,
                consumed_ios,
                timing,
            } => Ok(PageResult {
                page: first_page,
                consumed_ios,
                timing,
            }),
            other => Err(unexpected(CommandKind::ExecuteStatement, &other)),
        }
    }

    pub async fn fetch_page(&self, transaction_id: &str, next_page_token: &str) -> Result<PageResult> {
        let command = Command::FetchPage {
            transaction_id: transaction_id.to_string(),
            next_page_token: next_page_token.to_string(),
        };

        match self.send(command).await? {
            CommandResponse::FetchPage {
                page,
                consumed_ios,
                timing,
            } => Ok(PageResult {
                page,
                consumed_ios,
                timing,
            }),
            other => Err(unexpected(CommandKind::FetchPage, &other)),
        }
    }

    pub async fn commit_transaction(
        &self,
        transaction_id: &str,
        commit_digest: Vec<u8>,
    ) -> Result<CommitResult> {
        let command = Command::CommitTransaction {
            transaction_id: transaction_id.to_string(),
            commit_digest,
        };

        match self.send(command).await? {
            CommandResponse::CommitTransaction {
                transaction_id,
                commit_digest,
                consumed_ios,
                timing,
            } => Ok(CommitResult {
                transaction_id,
                commit_digest,
                consumed_ios,
                timing,
            }),
            other => Err(unexpected(CommandKind::CommitTransaction, &other)),
        }
    }

    pub async fn abort_transaction(&self) -> Result<()> {
        match self.send(Command::AbortTransaction).await? {
            CommandResponse::AbortTransaction { .. } => Ok(()),
            other => Err(unexpected(CommandKind::AbortTransaction, &other)),
        }
    }

    /// End the session on the server.
    ///
    /// Best effort: failures, including "already ended", are logged and
    /// swallowed.
    pub async fn end(&self) {
        match self.send(Command::EndSession).await {
            Ok(_) => debug!(ledger = %self.ledger, session = %self.token, "session ended"),
            Err(err) => debug!(
                ledger = %self.ledger,
                session = %self.token,
                error = %err,
                "ignoring failure while ending session"
            ),
        }
    }

    async fn send(&self, command: Command) -> Result<CommandResponse> {
        let request = CommandRequest {
            session_token: self.token.clone(),
            command,
        };
        Ok(self.transport.send_command(request).await?)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("ledger", &self.ledger)
            .field("token", &self.token)
            .finish()
    }
}

fn unexpected(expected: CommandKind, response: &CommandResponse) -> DriverError {
    DriverError::InvalidOperation(format!(
        "expected {} response, got {}",
        expected,
        response.kind()
    ))
}
