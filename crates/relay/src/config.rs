use core::time::Duration;

/// Worker threads started per logical CPU when no pool size is given.
pub const THREADS_PER_CPU: usize = 8;

/// Upper bound on how long the acceptor waits for an idle worker.
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);

/// Length of each shutdown phase (graceful wait, then forced wait).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Upper bound on writing an overload response to a slow peer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Runtime configuration for a [`crate::Dispatcher`].
///
/// Every value is fixed once the dispatcher is constructed. The pool size is
/// computed here rather than read from global state so tests can run with a
/// single worker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads. Always at least 1.
    pub pool_size: usize,
    /// How long an accepted connection may wait for a worker before it
    /// receives an overload response.
    pub handoff_timeout: Duration,
    /// Duration of each of the two waits per component during shutdown.
    pub grace_period: Duration,
    /// Write timeout applied to a connection before the overload response is
    /// sent on it.
    pub write_timeout: Duration,
    /// Backoff policy for consecutive accept failures.
    pub accept_retry: RetryPolicy,
}

impl DispatchConfig {
    /// Pool size derived from the logical CPU count of this machine.
    pub fn default_pool_size() -> usize {
        Self::pool_size_per_cpu(THREADS_PER_CPU)
    }

    /// `threads_per_cpu` workers for every logical CPU, and at least one.
    pub fn pool_size_per_cpu(threads_per_cpu: usize) -> usize {
        num_cpus::get()
            .max(1)
            .saturating_mul(threads_per_cpu)
            .max(1)
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub const fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_accept_retry(mut self, policy: RetryPolicy) -> Self {
        self.accept_retry = policy;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_size: Self::default_pool_size(),
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            accept_retry: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff applied when `accept` fails repeatedly.
///
/// A successful accept resets the failure count. Once `max_failures`
/// consecutive failures have been observed the acceptor gives up and exits
/// its loop; the dispatcher can still be closed normally afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_failures: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1_u32 << shift)
            .min(self.max_backoff)
    }

    /// Whether the acceptor should give up after `failures` consecutive
    /// failures.
    pub const fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_failures
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_failures: 16,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}
