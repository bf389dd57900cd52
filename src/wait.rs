//! Bounded waiting for asynchronous remote operations.
//!
//! Trainings, route activations and deployments all finish asynchronously on
//! the server; callers block on [`OperationWaiter`] until the operation
//! reaches a terminal state or the configured bound expires. Which states
//! count as terminal differs per call site, so the waiter is parameterized
//! by a [`TerminalStates`] predicate instead of hardcoding state names.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{OperationState, OperationStatus};
use crate::error::{ConfigError, FerroError, Result, WaitError};

/// Default wait bound in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default poll interval in seconds.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Timing configuration for a wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// Overall bound, measured from the start of the wait call.
    pub timeout: Duration,
    /// Sleep between status polls.
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl WaitConfig {
    /// Creates a wait configuration.
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Checks the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the timeout or poll interval is not
    /// positive.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(FerroError::Config(ConfigError::InvalidWaitConfig {
                message: String::from("timeout must be positive"),
            }));
        }
        if self.poll_interval.is_zero() {
            return Err(FerroError::Config(ConfigError::InvalidWaitConfig {
                message: String::from("poll interval must be positive"),
            }));
        }
        Ok(())
    }
}

/// Which operation states end a wait.
#[derive(Debug, Clone)]
pub struct TerminalStates {
    success: Vec<OperationState>,
    failure: Vec<OperationState>,
}

impl TerminalStates {
    /// Generic operations: `Succeeded` or `Ready` succeed, `Failed` fails.
    #[must_use]
    pub fn operation() -> Self {
        Self {
            success: vec![OperationState::Succeeded, OperationState::Ready],
            failure: vec![OperationState::Failed],
        }
    }

    /// Route readiness: only `Ready` is terminal.
    #[must_use]
    pub fn route_readiness() -> Self {
        Self {
            success: vec![OperationState::Ready],
            failure: vec![],
        }
    }

    /// Training/packaging jobs: `Succeeded` succeeds, `Failed` fails.
    #[must_use]
    pub fn job() -> Self {
        Self {
            success: vec![OperationState::Succeeded],
            failure: vec![OperationState::Failed],
        }
    }

    /// Returns true if the state ends the wait successfully.
    #[must_use]
    pub fn is_success(&self, state: OperationState) -> bool {
        self.success.contains(&state)
    }

    /// Returns true if the state ends the wait as a terminal failure.
    #[must_use]
    pub fn is_failure(&self, state: OperationState) -> bool {
        self.failure.contains(&state)
    }
}

/// Blocks a caller until a named remote operation reaches a terminal state.
///
/// Cancellation is cooperative: dropping the wait future stops the polling
/// loop at its current suspension point.
#[derive(Debug, Clone)]
pub struct OperationWaiter {
    terminal: TerminalStates,
    config: WaitConfig,
}

impl OperationWaiter {
    /// Creates a waiter with the given terminal-state predicate and timing.
    #[must_use]
    pub const fn new(terminal: TerminalStates, config: WaitConfig) -> Self {
        Self { terminal, config }
    }

    /// Waits without relaying progress.
    ///
    /// # Errors
    ///
    /// Returns a timeout error when the bound expires, an operation-failed
    /// error when the server reports a failure state, or a configuration
    /// error for an invalid [`WaitConfig`].
    pub async fn wait<F, Fut>(&self, operation: &str, fetch_status: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OperationStatus>>,
    {
        self.wait_with_progress(operation, fetch_status, |_| {}).await
    }

    /// Waits, invoking `on_progress` with the latest status on every
    /// non-terminal tick.
    ///
    /// Transient API errors while fetching are logged and treated as no-op
    /// ticks; they count against the same overall timeout but never
    /// terminate the wait on their own.
    ///
    /// # Errors
    ///
    /// See [`OperationWaiter::wait`].
    pub async fn wait_with_progress<F, Fut, P>(
        &self,
        operation: &str,
        mut fetch_status: F,
        mut on_progress: P,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OperationStatus>>,
        P: FnMut(&OperationStatus),
    {
        self.config.validate()?;

        let start = Instant::now();

        loop {
            // The bound is measured from the start of the call, so a slow
            // first fetch still counts toward it.
            if start.elapsed() > self.config.timeout {
                return Err(FerroError::Wait(WaitError::Timeout {
                    operation: operation.to_string(),
                    timeout_secs: self.config.timeout.as_secs(),
                }));
            }

            match fetch_status().await {
                Ok(status) => {
                    if self.terminal.is_success(status.state) {
                        info!(
                            "Operation '{operation}' finished ({}) after {}s",
                            status.raw_state,
                            start.elapsed().as_secs()
                        );
                        return Ok(());
                    }

                    if self.terminal.is_failure(status.state) {
                        return Err(FerroError::Wait(WaitError::OperationFailed {
                            operation: operation.to_string(),
                            message: status
                                .message
                                .unwrap_or_else(|| format!("state is {}", status.raw_state)),
                        }));
                    }

                    debug!(
                        "Operation '{operation}' not finished yet (state: {})",
                        status.raw_state
                    );
                    on_progress(&status);
                }
                Err(e) if matches!(e, FerroError::Api(_)) => {
                    // The server has not confirmed the operation yet; retry
                    // on the next tick.
                    warn!("Status fetch for '{operation}' failed: {e}");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
