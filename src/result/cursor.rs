use super::BufferedResult;
use crate::core::{DriverError, IoUsage, Result, TimingInformation, ValueHolder, accumulate};
use crate::session::{PageResult, Session};
use futures::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Values returned by one statement.
///
/// Holds the first page and fetches the following pages from the owning
/// session on demand. A result can be walked once: a second call to
/// [`StatementResult::cursor`] fails. Paging needs the transaction to still
/// be open: once it commits or aborts, values already held are still
/// returned but fetching another page fails with `InvalidState` without
/// touching the session. Use [`StatementResult::buffer`] to keep values
/// around after the transaction ends.
#[derive(Debug)]
pub struct StatementResult {
    session: Arc<Session>,
    transaction_id: String,
    transaction_open: Arc<AtomicBool>,
    buffer: VecDeque<ValueHolder>,
    next_page_token: Option<String>,
    io_usage: Option<IoUsage>,
    timing: Option<TimingInformation>,
    pages_fetched: usize,
    enumerated: bool,
}

impl StatementResult {
    pub(crate) fn new(
        session: Arc<Session>,
        transaction_id: String,
        transaction_open: Arc<AtomicBool>,
        first: PageResult,
    ) -> Self {
        Self {
            session,
            transaction_id,
            transaction_open,
            buffer: first.page.values.into(),
            next_page_token: first.page.next_page_token,
            io_usage: first.consumed_ios,
            timing: first.timing,
            pages_fetched: 0,
            enumerated: false,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// IO usage summed over every page read so far.
    pub fn io_usage(&self) -> Option<IoUsage> {
        self.io_usage
    }

    /// Server processing time summed over every page read so far.
    pub fn timing_information(&self) -> Option<TimingInformation> {
        self.timing
    }

    /// Number of pages fetched after the first one.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Start walking the values. Fails if a cursor was already handed out.
    pub fn cursor(&mut self) -> Result<ResultCursor<'_>> {
        if self.enumerated {
            return Err(DriverError::InvalidOperation(
                "statement result can only be enumerated once".into(),
            ));
        }
        self.enumerated = true;
        Ok(ResultCursor { result: self })
    }

    /// Read every remaining page into memory.
    pub async fn buffer(mut self) -> Result<BufferedResult> {
        let values = self.cursor()?.try_collect().await?;
        Ok(BufferedResult::new(values, self.io_usage, self.timing))
    }

    async fn next_value(&mut self) -> Result<Option<ValueHolder>> {
        loop {
            if let Some(value) = self.buffer.pop_front() {
                return Ok(Some(value));
            }

            let Some(token) = self.next_page_token.take() else {
                return Ok(None);
            };
            if !self.transaction_open.load(Ordering::SeqCst) {
                // Keep the token so the failure repeats on the next call.
                self.next_page_token = Some(token);
                return Err(DriverError::InvalidState(format!(
                    "Cannot fetch the next page: transaction {} is closed",
                    self.transaction_id
                )));
            }

            let fetched = self
                .session
                .fetch_page(&self.transaction_id, &token)
                .await?;
            self.pages_fetched += 1;
            self.buffer = fetched.page.values.into();
            self.next_page_token = fetched.page.next_page_token;
            self.io_usage = accumulate(self.io_usage, fetched.consumed_ios);
            self.timing = accumulate(self.timing, fetched.timing);
        }
    }
}

/// Single pass over a [`StatementResult`].
#[derive(Debug)]
pub struct ResultCursor<'r> {
    result: &'r mut StatementResult,
}

impl<'r> ResultCursor<'r> {
    /// The next value, fetching another page when the current one runs out.
    pub async fn next(&mut self) -> Result<Option<ValueHolder>> {
        self.result.next_value().await
    }

    pub async fn try_collect(mut self) -> Result<Vec<ValueHolder>> {
        let mut values = Vec::new();
        while let Some(value) = self.next().await? {
            values.push(value);
        }
        Ok(values)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ValueHolder>> + 'r {
        futures::stream::try_unfold(self, |mut cursor| async move {
            Ok::<_, DriverError>(cursor.next().await?.map(|value| (value, cursor)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Page;
    use crate::transport::{CommandKind, InMemoryLedger, LedgerTransport};
    use futures::TryStreamExt;

    fn values(range: std::ops::Range<u8>) -> Vec<ValueHolder> {
        range.map(|i| ValueHolder::new(vec![i])).collect()
    }

    async fn result_over(ledger: Arc<InMemoryLedger>, count: u8) -> StatementResult {
        let transport: Arc<dyn LedgerTransport> = ledger;
        let session = Arc::new(Session::start(transport, "books").await.unwrap());
        let txn = session.start_transaction().await.unwrap();
        let first = session
            .execute_statement(&txn, &format!("SELECT {count}"), vec![])
            .await
            .unwrap();
        StatementResult::new(session, txn, Arc::new(AtomicBool::new(true)), first)
    }

    fn paged_ledger(page_size: usize) -> Arc<InMemoryLedger> {
        Arc::new(
            InMemoryLedger::new("books")
                .page_size(page_size)
                .with_handler(|statement, _| {
                    let count: u8 = statement.trim_start_matches("SELECT ").parse().unwrap_or(0);
                    Ok(values(0..count))
                }),
        )
    }

    #[tokio::test]
    async fn test_two_pages_yield_all_values_in_order() {
        let ledger = paged_ledger(2);
        let mut result = result_over(ledger.clone(), 3).await;

        let collected = result.cursor().unwrap().try_collect().await.unwrap();
        assert_eq!(collected, values(0..3));
        assert_eq!(result.pages_fetched(), 1);
        assert_eq!(ledger.command_count(CommandKind::FetchPage), 1);
    }

    #[tokio::test]
    async fn test_second_cursor_is_rejected() {
        let mut result = result_over(paged_ledger(2), 1).await;
        let _ = result.cursor().unwrap();

        let err = result.cursor().unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_stats_accumulate_across_pages() {
        let mut result = result_over(paged_ledger(2), 5).await;
        assert_eq!(result.io_usage(), Some(IoUsage::new(5, 0)));

        result.cursor().unwrap().try_collect().await.unwrap();
        // First page reports 5 reads, the two fetched pages report 2 and 1.
        assert_eq!(result.io_usage(), Some(IoUsage::new(8, 0)));
        assert_eq!(result.timing_information(), Some(TimingInformation::new(3)));
    }

    #[tokio::test]
    async fn test_missing_stats_keep_accumulated_values() {
        let ledger = Arc::new(InMemoryLedger::new("books").without_stats());
        let transport: Arc<dyn LedgerTransport> = ledger;
        let session = Arc::new(Session::start(transport, "books").await.unwrap());
        let first = PageResult {
            page: Page::new(values(0..1), None),
            consumed_ios: Some(IoUsage::new(4, 0)),
            timing: None,
        };

        let mut result =
            StatementResult::new(session, "txn".into(), Arc::new(AtomicBool::new(true)), first);
        result.cursor().unwrap().try_collect().await.unwrap();
        assert_eq!(result.io_usage(), Some(IoUsage::new(4, 0)));
        assert_eq!(result.timing_information(), None);
    }

    #[tokio::test]
    async fn test_closed_transaction_stops_paging() {
        let ledger = paged_ledger(2);
        let transport: Arc<dyn LedgerTransport> = ledger.clone();
        let session = Arc::new(Session::start(transport, "books").await.unwrap());
        let txn = session.start_transaction().await.unwrap();
        let first = session
            .execute_statement(&txn, "SELECT 3", vec![])
            .await
            .unwrap();
        let open = Arc::new(AtomicBool::new(true));
        let mut result = StatementResult::new(session, txn, Arc::clone(&open), first);

        open.store(false, Ordering::SeqCst);
        let mut cursor = result.cursor().unwrap();
        assert_eq!(cursor.next().await.unwrap(), Some(ValueHolder::new(vec![0])));
        assert_eq!(cursor.next().await.unwrap(), Some(ValueHolder::new(vec![1])));
        assert!(matches!(
            cursor.next().await.unwrap_err(),
            DriverError::InvalidState(_)
        ));
        assert!(matches!(
            cursor.next().await.unwrap_err(),
            DriverError::InvalidState(_)
        ));
        assert_eq!(ledger.command_count(CommandKind::FetchPage), 0);
    }

    #[tokio::test]
    async fn test_stream_and_buffer() {
        let mut result = result_over(paged_ledger(2), 4).await;
        let streamed: Vec<_> = result
            .cursor()
            .unwrap()
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streamed.len(), 4);

        let buffered = result_over(paged_ledger(3), 7).await.buffer().await.unwrap();
        assert_eq!(buffered.len(), 7);
        assert_eq!(buffered.values(), values(0..7).as_slice());
    }
}
