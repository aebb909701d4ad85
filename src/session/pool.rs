use super::Session;
use crate::core::{DriverError, Result};
use crate::driver::config::DriverConfig;
use crate::retry::{RetryHandler, RetryPolicy, RetryTarget};
use crate::serialization::ValueSerializer;
use crate::transaction::{Transaction, TransactionDisposition, TransactionExecutor, TransactionFailure};
use crate::transport::LedgerTransport;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Idle sessions probed per acquire before a new session is started instead.
pub const MAX_STALE_SESSION_PROBES: usize = 3;

/// Session pool
///
/// Bounded by a counting semaphore: a caller holds one permit for as long as
/// it has a session checked out, so checked-out plus idle sessions never
/// exceed the capacity. Idle sessions are handed out in FIFO order.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    ledger: String,
    transport: Arc<dyn LedgerTransport>,
    serializer: Arc<dyn ValueSerializer>,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Arc<Session>>>,
    capacity: usize,
    acquire_timeout: Duration,
    probe_idle: bool,
    closed: AtomicBool,
    sessions_created: AtomicUsize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Arc<Session>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn create_session(&self) -> Result<Arc<Session>> {
        let session = Session::start(Arc::clone(&self.transport), &self.ledger).await?;
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(session))
    }

    /// Pop an idle session that still answers, dropping stale ones.
    async fn take_idle(&self) -> Option<Arc<Session>> {
        for _ in 0..MAX_STALE_SESSION_PROBES {
            // The guard must not live across the probe below.
            let session = self.idle().pop_front()?;
            if !self.probe_idle {
                return Some(session);
            }

            match session.abort_transaction().await {
                Ok(()) => return Some(session),
                Err(err) => warn!(
                    ledger = %self.ledger,
                    session = %session.token(),
                    error = %err,
                    "dropping stale idle session"
                ),
            }
        }
        None
    }
}

impl SessionPool {
    /// Create a pool for the ledger named in `config`.
    ///
    /// # Errors
    /// `InvalidArgument` when the capacity resolves to zero.
    pub fn new(
        config: &DriverConfig,
        transport: Arc<dyn LedgerTransport>,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Result<Self> {
        let capacity = match config.max_concurrent_transactions() {
            0 => transport.max_connections(),
            n => n,
        };
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(DriverError::InvalidArgument(format!(
                "pool capacity must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                capacity
            )));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                ledger: config.ledger_name().to_string(),
                transport,
                serializer,
                permits: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                acquire_timeout: config.session_acquire_timeout(),
                probe_idle: config.probe_idle_sessions(),
                closed: AtomicBool::new(false),
                sessions_created: AtomicUsize::new(0),
            }),
        })
    }

    pub fn ledger(&self) -> &str {
        &self.inner.ledger
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Check out a session
    ///
    /// Waits up to the configured acquire timeout for a permit, then reuses
    /// an idle session or starts a new one. If starting fails the permit is
    /// given back and the start error is returned as is.
    ///
    /// # Errors
    /// `PoolExhausted` on timeout, `DriverClosed` once the pool is closed.
    pub async fn get_session(&self) -> Result<PooledSession> {
        if self.inner.is_closed() {
            return Err(DriverError::DriverClosed);
        }

        let acquire = Arc::clone(&self.inner.permits).acquire_owned();
        let permit = match tokio::time::timeout(self.inner.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DriverError::DriverClosed),
            Err(_) => {
                return Err(DriverError::PoolExhausted(format!(
                    "no session available within {:?} (capacity {})",
                    self.inner.acquire_timeout, self.inner.capacity
                )));
            }
        };

        let session = match self.inner.take_idle().await {
            Some(session) => session,
            None => self.inner.create_session().await?,
        };
        debug!(ledger = %self.inner.ledger, session = %session.token(), "session checked out");

        Ok(PooledSession {
            session,
            _permit: permit,
            pool: Arc::clone(&self.inner),
            returned: false,
        })
    }

    /// Run `body` in a transaction with retries
    ///
    /// The body gets a fresh [`TransactionExecutor`] on every attempt and may
    /// therefore run more than once. Returning `Commit` commits and verifies
    /// the digest; returning `Abort` aborts and is not retried.
    pub async fn execute<T, F, Fut, R>(
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
        let mut session = self.get_session().await?;
        let handler = RetryHandler::new(policy.clone());

        let outcome = {
            let mut run = TransactionRun {
                session: &mut session,
                serializer: Arc::clone(&self.inner.serializer),
                body,
                _marker: PhantomData,
            };
            handler.retriable_execute(&mut run, on_retry).await
        };

        match outcome {
            Ok(disposition) => {
                session.release().await;
                Ok(disposition)
            }
            Err(failure) => {
                if failure.session_alive {
                    session.release().await;
                } else {
                    session.discard().await;
                }
                Err(failure.into_error())
            }
        }
    }

    /// Close the pool and end every idle session. Sessions still checked out
    /// are ended when they come back. Calling it again does nothing.
    pub async fn close(&self) {
        let idle: Vec<_> = {
            // Flip the flag under the idle lock so a concurrent release either
            // lands before the drain or sees the pool closed.
            let mut idle = self.inner.idle();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            idle.drain(..).collect()
        };
        self.inner.permits.close();

        let drained = idle.len();
        for session in idle {
            session.end().await;
        }
        info!(ledger = %self.inner.ledger, drained, "session pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.inner.capacity,
            available_permits: self.inner.permits.available_permits(),
            idle_sessions: self.inner.idle().len(),
            sessions_created: self.inner.sessions_created.load(Ordering::SeqCst),
        }
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("ledger", &self.inner.ledger)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Session pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available_permits: usize,
    pub idle_sessions: usize,
    pub sessions_created: usize,
}

impl PoolStats {
    pub fn checked_out(&self) -> usize {
        self.capacity.saturating_sub(self.available_permits)
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} checked out, {} idle, {} created",
            self.checked_out(),
            self.capacity,
            self.idle_sessions,
            self.sessions_created
        )
    }
}

/// A checked-out session and the permit that goes with it.
///
/// Give it back with [`release`](Self::release) or
/// [`discard`](Self::discard). Dropping it without either abandons the
/// session: the permit is returned but the session is not reused.
pub struct PooledSession {
    session: Arc<Session>,
    _permit: OwnedSemaphorePermit,
    pool: Arc<PoolInner>,
    returned: bool,
}

impl PooledSession {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn token(&self) -> &str {
        self.session.token()
    }

    /// Return the session to the idle set. Never waits on other callers.
    pub async fn release(mut self) {
        self.returned = true;
        {
            let mut idle = self.pool.idle();
            if !self.pool.is_closed() {
                idle.push_back(Arc::clone(&self.session));
                return;
            }
        }
        self.session.end().await;
    }

    /// End the session instead of pooling it.
    pub async fn discard(mut self) {
        self.returned = true;
        debug!(session = %self.session.token(), "discarding session");
        self.session.end().await;
    }

    /// Swap in a fresh session under the same permit and end the old one.
    ///
    /// On failure the current session is kept.
    pub async fn replace(&mut self) -> Result<()> {
        let fresh = self.pool.create_session().await?;
        let old = std::mem::replace(&mut self.session, fresh);
        old.end().await;
        debug!(
            old = %old.token(),
            new = %self.session.token(),
            "session replaced"
        );
        Ok(())
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if !self.returned {
            debug!(session = %self.session.token(), "pooled session dropped, abandoning it");
        }
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .field("returned", &self.returned)
            .finish()
    }
}

/// One transaction body bound to a checked-out session, runnable by the
/// retry handler.
struct TransactionRun<'s, F, Fut, T> {
    session: &'s mut PooledSession,
    serializer: Arc<dyn ValueSerializer>,
    body: F,
    _marker: PhantomData<fn() -> (Fut, T)>,
}

/// Whether a session survives `err` without asking it. `None` means only an
/// abort can tell.
fn known_session_health(err: &DriverError) -> Option<bool> {
    let transport = err.as_transport()?;
    if transport.is_invalid_session() {
        Some(false)
    } else if transport.is_occ_conflict() {
        Some(true)
    } else {
        None
    }
}

impl<F, Fut, T> RetryTarget for TransactionRun<'_, F, Fut, T>
where
    T: Send,
    F: FnMut(TransactionExecutor) -> Fut + Send,
    Fut: Future<Output = Result<TransactionDisposition<T>>> + Send,
{
    type Output = TransactionDisposition<T>;

    async fn attempt(&mut self) -> std::result::Result<TransactionDisposition<T>, TransactionFailure> {
        let session = Arc::clone(self.session.session());

        let transaction = match Transaction::start(Arc::clone(&session)).await {
            Ok(transaction) => transaction,
            Err(err) => {
                let session_alive = match known_session_health(&err) {
                    Some(alive) => alive,
                    None => session.abort_transaction().await.is_ok(),
                };
                return Err(TransactionFailure::new(err, None, session_alive));
            }
        };

        let transaction_id = transaction.id().to_string();
        let shared = Arc::new(AsyncMutex::new(transaction));
        let executor = TransactionExecutor::new(
            Arc::clone(&shared),
            &transaction_id,
            Arc::clone(&self.serializer),
        );

        let outcome = (self.body)(executor).await;
        let mut transaction = shared.lock().await;

        let err = match outcome {
            Ok(TransactionDisposition::Commit(value)) => match transaction.commit().await {
                Ok(()) => return Ok(TransactionDisposition::Commit(value)),
                Err(err) => err,
            },
            Ok(TransactionDisposition::Abort) => {
                transaction.abort().await;
                return Ok(TransactionDisposition::Abort);
            }
            Err(err) => err,
        };

        let session_alive = match known_session_health(&err) {
            Some(alive) => alive,
            None => transaction.try_abort().await,
        };
        Err(TransactionFailure::new(err, Some(transaction_id), session_alive))
    }

    async fn recover(&mut self) -> Result<()> {
        self.session.replace().await
    }
}
