pub mod error;
pub mod memory;

pub use error::TransportError;
pub use memory::{InMemoryLedger, StatementHandler};

use crate::core::{IoUsage, Page, TimingInformation, ValueHolder};
use async_trait::async_trait;
use std::fmt;

/// Default for [`LedgerTransport::max_connections`].
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;

/// The network client the driver talks through.
///
/// Implementations own connection handling, TLS, credentials and the wire
/// encoding of requests. The driver only needs to open sessions and send
/// commands on them. Wrap a real service client to implement this trait,
/// or use [`InMemoryLedger`] for tests.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Opens a session on `ledger` and returns its token.
    async fn start_session(&self, ledger: &str) -> Result<String, TransportError>;

    /// Sends one command on an existing session.
    async fn send_command(&self, request: CommandRequest) -> Result<CommandResponse, TransportError>;

    /// Upper bound on concurrently open connections, used when the driver
    /// is configured with zero max concurrent transactions.
    fn max_connections(&self) -> usize {
        DEFAULT_MAX_CONNECTIONS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub session_token: String,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartTransaction,
    ExecuteStatement {
        transaction_id: String,
        statement: String,
        parameters: Vec<ValueHolder>,
    },
    FetchPage {
        transaction_id: String,
        next_page_token: String,
    },
    CommitTransaction {
        transaction_id: String,
        commit_digest: Vec<u8>,
    },
    AbortTransaction,
    EndSession,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::StartTransaction => CommandKind::StartTransaction,
            Command::ExecuteStatement { .. } => CommandKind::ExecuteStatement,
            Command::FetchPage { .. } => CommandKind::FetchPage,
            Command::CommitTransaction { .. } => CommandKind::CommitTransaction,
            Command::AbortTransaction => CommandKind::AbortTransaction,
            Command::EndSession => CommandKind::EndSession,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    StartSession,
    StartTransaction,
    ExecuteStatement,
    FetchPage,
    CommitTransaction,
    AbortTransaction,
    EndSession,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StartSession => "StartSession",
            Self::StartTransaction => "StartTransaction",
            Self::ExecuteStatement => "ExecuteStatement",
            Self::FetchPage => "FetchPage",
            Self::CommitTransaction => "CommitTransaction",
            Self::AbortTransaction => "AbortTransaction",
            Self::EndSession => "EndSession",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    StartTransaction {
        transaction_id: String,
        timing: Option<TimingInformation>,
    },
    ExecuteStatement {
        first_page: Page,
        consumed_ios: Option<IoUsage>,
        timing: Option<TimingInformation>,
    },
    FetchPage {
        page: Page,
        consumed_ios: Option<IoUsage>,
        timing: Option<TimingInformation>,
    },
    CommitTransaction {
        transaction_id: String,
        commit_digest: Vec<u8>,
        consumed_ios: Option<IoUsage>,
        timing: Option<TimingInformation>,
    },
    AbortTransaction {
        timing: Option<TimingInformation>,
    },
    EndSession {
        timing: Option<TimingInformation>,
    },
}

impl CommandResponse {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::StartTransaction { .. } => CommandKind::StartTransaction,
            Self::ExecuteStatement { .. } => CommandKind::ExecuteStatement,
            Self::FetchPage { .. } => CommandKind::FetchPage,
            Self::CommitTransaction { .. } => CommandKind::CommitTransaction,
            Self::AbortTransaction { .. } => CommandKind::AbortTransaction,
            Self::EndSession { .. } => CommandKind::EndSession,
        }
    }
}
