use crate::retry::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

pub const URL_SCHEME: &str = "qldb://";
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Ledger name must not be empty")]
    EmptyLedgerName,

    #[error("Invalid configuration: {0}")]
    InvalidArgument(String),

    #[error("Invalid backoff: {0}")]
    InvalidBackoff(String),
}

/// Validated driver configuration.
///
/// Built through [`DriverConfigBuilder`]; every field is checked once in
/// [`DriverConfigBuilder::build`] and the result never changes afterwards.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    ledger_name: String,
    max_concurrent_transactions: usize,
    retry_policy: RetryPolicy,
    session_acquire_timeout: Duration,
    probe_idle_sessions: bool,
}

impl DriverConfig {
    pub fn builder(ledger_name: &str) -> DriverConfigBuilder {
        DriverConfigBuilder::new(ledger_name)
    }

    pub fn ledger_name(&self) -> &str {
        &self.ledger_name
    }

    /// Pool capacity. Zero means the transport's connection limit.
    pub fn max_concurrent_transactions(&self) -> usize {
        self.max_concurrent_transactions
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// How long `get_session` waits for a free permit.
    pub fn session_acquire_timeout(&self) -> Duration {
        self.session_acquire_timeout
    }

    /// Whether idle sessions are checked before being handed out again.
    pub fn probe_idle_sessions(&self) -> bool {
        self.probe_idle_sessions
    }

    /// Render as a connection string accepted by
    /// [`DriverConfigBuilder::from_url`]. The backoff strategy is not part
    /// of the URL.
    pub fn to_url(&self) -> String {
        format!(
            "{}{}?max_concurrent_transactions={}&max_retries={}&acquire_timeout_ms={}&probe_idle_sessions={}",
            URL_SCHEME,
            self.ledger_name,
            self.max_concurrent_transactions,
            self.retry_policy.max_retries(),
            self.session_acquire_timeout.as_millis(),
            self.probe_idle_sessions
        )
    }
}

/// Fluent builder for [`DriverConfig`].
#[derive(Debug, Clone)]
pub struct DriverConfigBuilder {
    ledger_name: String,
    max_concurrent_transactions: usize,
    retry_policy: RetryPolicy,
    session_acquire_timeout: Duration,
    probe_idle_sessions: bool,
}

impl DriverConfigBuilder {
    pub fn new(ledger_name: &str) -> Self {
        Self {
            ledger_name: ledger_name.to_string(),
            max_concurrent_transactions: 0,
            retry_policy: RetryPolicy::default(),
            session_acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            probe_idle_sessions: true,
        }
    }

    pub fn ledger_name(mut self, ledger_name: &str) -> Self {
        self.ledger_name = ledger_name.to_string();
        self
    }

    pub fn max_concurrent_transactions(mut self, max: usize) -> Self {
        self.max_concurrent_transactions = max;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Keep the backoff strategy, change only the retry limit.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy = RetryPolicy::new(max_retries, self.retry_policy.backoff_arc());
        self
    }

    pub fn session_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.session_acquire_timeout = timeout;
        self
    }

    pub fn probe_idle_sessions(mut self, probe: bool) -> Self {
        self.probe_idle_sessions = probe;
        self
    }

    /// Parse a connection string
    ///
    /// Format: `qldb://<ledger>?max_concurrent_transactions=N&max_retries=N&acquire_timeout_ms=N&probe_idle_sessions=bool`.
    /// Every query parameter is optional.
    ///
    /// # Examples
    ///
    /// ```
    /// use rustqldb::driver::DriverConfigBuilder;
    ///
    /// let config = DriverConfigBuilder::from_url("qldb://vehicles?max_retries=2")
    ///     .unwrap()
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.ledger_name(), "vehicles");
    /// assert_eq!(config.retry_policy().max_retries(), 2);
    /// ```
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let rest = url.strip_prefix(URL_SCHEME).ok_or_else(|| {
            ConfigError::InvalidArgument(format!("URL must start with '{}'", URL_SCHEME))
        })?;

        let (ledger, query) = match rest.split_once('?') {
            Some((ledger, query)) => (ledger, Some(query)),
            None => (rest, None),
        };
        let mut builder = Self::new(ledger.trim_end_matches('/'));

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::InvalidArgument(format!("Expected key=value, got '{}'", pair))
            })?;

            builder = match key {
                "max_concurrent_transactions" => {
                    let max = parse_count(key, value)?;
                    builder.max_concurrent_transactions(usize::try_from(max).map_err(|_| {
                        ConfigError::InvalidArgument(format!("{} is too large", key))
                    })?)
                }
                "max_retries" => {
                    let max = parse_count(key, value)?;
                    builder.max_retries(u32::try_from(max).map_err(|_| {
                        ConfigError::InvalidArgument(format!("{} is too large", key))
                    })?)
                }
                "acquire_timeout_ms" => {
                    builder.session_acquire_timeout(Duration::from_millis(parse_count(key, value)?))
                }
                "probe_idle_sessions" => builder.probe_idle_sessions(value.parse().map_err(|_| {
                    ConfigError::InvalidArgument(format!("{} must be true or false", key))
                })?),
                other => {
                    return Err(ConfigError::InvalidArgument(format!(
                        "Unknown parameter '{}'",
                        other
                    )));
                }
            };
        }

        Ok(builder)
    }

    pub fn build(self) -> Result<DriverConfig, ConfigError> {
        if self.ledger_name.trim().is_empty() {
            return Err(ConfigError::EmptyLedgerName);
        }
        if self.max_concurrent_transactions > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidArgument(format!(
                "max_concurrent_transactions must not exceed {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }

        Ok(DriverConfig {
            ledger_name: self.ledger_name,
            max_concurrent_transactions: self.max_concurrent_transactions,
            retry_policy: self.retry_policy,
            session_acquire_timeout: self.session_acquire_timeout,
            probe_idle_sessions: self.probe_idle_sessions,
        })
    }
}

/// Non-negative integer setting. Negative numbers are rejected explicitly
/// so the message says so instead of "invalid digit".
fn parse_count(key: &str, value: &str) -> Result<u64, ConfigError> {
    let parsed: i64 = value.parse().map_err(|_| {
        ConfigError::InvalidArgument(format!("{} must be a number, got '{}'", key, value))
    })?;
    u64::try_from(parsed)
        .map_err(|_| ConfigError::InvalidArgument(format!("{} must not be negative", key)))
}

impl Default for DriverConfigBuilder {
    fn default() -> Self {
        Self::new("")
    }
}
