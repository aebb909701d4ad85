use super::{RetryContext, RetryPolicy};
use crate::core::{DriverError, Result};
use crate::transaction::TransactionFailure;
use std::future::Future;
use tokio::time::sleep;
use tracing::{Level, event};

/// How a failed attempt is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Give up and surface the error.
    Fatal,
    /// Try again, counted against the retry limit.
    Retry,
    /// Replace the session and try again, not counted.
    Recover,
}

/// Classifies an error surfacing from a transaction attempt.
pub fn classify(error: &DriverError) -> RetryDisposition {
    let Some(transport) = error.as_transport() else {
        return RetryDisposition::Fatal;
    };

    if transport.is_transaction_expiry() {
        RetryDisposition::Fatal
    } else if transport.is_invalid_session() {
        RetryDisposition::Recover
    } else if transport.is_occ_conflict() || transport.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Fatal
    }
}

/// Something the retry handler can run repeatedly.
pub trait RetryTarget: Send {
    type Output: Send;

    /// Run one attempt.
    fn attempt(&mut self) -> impl Future<Output = std::result::Result<Self::Output, TransactionFailure>> + Send;

    /// Swap the underlying session for a fresh one.
    fn recover(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Drives a [`RetryTarget`] until it succeeds or a failure is final.
///
/// OCC conflicts and transient faults are retried with backoff until the
/// policy's limit is used up. An invalid session (other than an expired
/// transaction) gets the session replaced and is retried right away without
/// touching the limit. Everything else is returned as is.
#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    policy: RetryPolicy,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `target`, calling `on_retry` with the retry number before every
    /// counted retry.
    pub async fn retriable_execute<G, R>(
        &self,
        target: &mut G,
        mut on_retry: R,
    ) -> std::result::Result<G::Output, TransactionFailure>
    where
        G: RetryTarget,
        R: FnMut(u32) + Send,
    {
        let mut retries = 0u32;

        loop {
            let failure = match target.attempt().await {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };

            match classify(&failure.error) {
                RetryDisposition::Fatal => {
                    event!(
                        Level::DEBUG,
                        error = %failure.error,
                        session_alive = failure.session_alive,
                        "transaction failed, not retrying"
                    );
                    return Err(failure);
                }
                RetryDisposition::Recover => {
                    event!(Level::WARN, error = %failure.error, "session invalidated, recovering");
                    Self::recover(target, &failure).await?;
                }
                RetryDisposition::Retry => {
                    if !failure.session_alive {
                        Self::recover(target, &failure).await?;
                    }

                    retries += 1;
                    if retries > self.policy.max_retries() {
                        event!(
                            Level::WARN,
                            retries = retries - 1,
                            error = %failure.error,
                            "retry limit reached"
                        );
                        return Err(failure);
                    }

                    on_retry(retries);
                    let delay = self.policy.backoff().calculate_delay(&RetryContext {
                        retry_attempt: retries,
                        last_error: &failure.error,
                    });
                    event!(
                        Level::INFO,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "retrying transaction"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn recover<G: RetryTarget>(
        target: &mut G,
        failure: &TransactionFailure,
    ) -> std::result::Result<(), TransactionFailure> {
        target.recover().await.map_err(|err| {
            event!(Level::ERROR, error = %err, "could not replace session");
            TransactionFailure::new(err, failure.transaction_id.clone(), false)
        })
    }
}
