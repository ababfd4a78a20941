//! Event-id polling loop
//!
//! Long-running vehicle commands are acknowledged asynchronously. The first
//! request is sent with `event-id: 0`; while the server has no result it
//! answers with a correlation token (or code 4) and the request is sent
//! again carrying that token, until a result arrives, the time budget runs
//! out, or the caller cancels.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TimingConfig;
use crate::envelope::INITIAL_EVENT_ID;
use crate::error::{IsmartClientError, Result};

/// Result of a single attempt inside the polling loop
#[derive(Debug)]
pub enum Attempt<T> {
    /// The server produced a result
    Done(T),
    /// The server asked to poll again with `event_id`
    Retry {
        event_id: String,
        code: i64,
        message: String,
    },
}

/// Timing of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between attempts
    pub interval: Duration,
    /// Total wall-clock budget, measured from the first attempt
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self::new(timing.poll_interval(), timing.max_poll_duration())
    }
}

/// Per-invocation loop state
#[derive(Debug, Clone)]
pub struct RetryState {
    pub event_id: String,
    pub attempts: u32,
    pub started: Instant,
    pub deadline: Instant,
}

impl RetryState {
    fn new(started: Instant, policy: &PollPolicy) -> Self {
        Self {
            event_id: INITIAL_EVENT_ID.to_string(),
            attempts: 0,
            started,
            deadline: started + policy.max_wait,
        }
    }
}

/// Drive `attempt` until it returns a result, fails, the budget expires or
/// `cancel` fires.
///
/// `attempt` receives the event-id to send. Attempts never overlap. After a
/// retry the loop sleeps `policy.interval` and gives up with
/// [`IsmartClientError::Timeout`] once the deadline has been reached.
/// Cancellation is checked before every attempt and during the sleep; an
/// attempt already in flight is allowed to finish.
pub async fn poll_with_event_id<T, F, Fut>(
    policy: PollPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let mut state = RetryState::new(clock.now(), &policy);

    loop {
        if cancel.is_cancelled() {
            info!(attempts = state.attempts, "Polling cancelled");
            return Err(IsmartClientError::Cancelled);
        }

        state.attempts += 1;
        debug!(
            attempt = state.attempts,
            event_id = %state.event_id,
            "Sending polling attempt"
        );

        match attempt(state.event_id.clone()).await? {
            Attempt::Done(value) => {
                debug!(attempts = state.attempts, "Polling finished");
                return Ok(value);
            }
            Attempt::Retry {
                event_id,
                code,
                message,
            } => {
                if event_id != state.event_id {
                    debug!("Updating event_id to the newly obtained value {}", event_id);
                }
                debug!(code, %message, "Server asked to retry");
                state.event_id = event_id;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(attempts = state.attempts, "Polling cancelled");
                return Err(IsmartClientError::Cancelled);
            }
            _ = clock.sleep(policy.interval) => {}
        }

        let now = clock.now();
        if now >= state.deadline {
            let elapsed = now.duration_since(state.started);
            warn!(
                attempts = state.attempts,
                event_id = %state.event_id,
                "Polling gave up after {:?}",
                elapsed
            );
            return Err(IsmartClientError::Timeout {
                attempts: state.attempts,
                elapsed,
            });
        }
    }
}
