//! Event-driven readiness waiting
//!
//! [`ReadinessWatcher::wait`] consumes a resource's change events until a
//! predicate holds on an Added/Modified state. The wait ends in exactly one of
//! four ways:
//!
//! - predicate satisfied: the state is returned
//! - stream error, stream closed or resource deleted: `ResourceWatch`
//! - deadline elapsed: `Timeout` (the goal state is unknown, not failed)
//! - cancellation token fired: `Cancelled`
//!
//! The subscription is released on every path.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use mirrorguard_common::Error;
use mirrorguard_platform::{ResourceEvent, Subscription};

/// Deadline used when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Progress of a single wait
enum WaitState<T> {
    Waiting,
    Satisfied(T),
    Failed(Error),
}

/// Waits for watched resources to reach a goal state
#[derive(Clone, Debug)]
pub struct ReadinessWatcher {
    timeout: Duration,
    cancel: CancellationToken,
}

impl ReadinessWatcher {
    /// Watcher bounded by `timeout` and stopped early by `cancel`
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// The bound applied to every wait
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until `predicate` holds for an observed state of the subscribed resource
    pub async fn wait<T, P>(
        &self,
        mut subscription: Subscription<T>,
        predicate: P,
    ) -> Result<T, Error>
    where
        P: Fn(&T) -> bool,
    {
        let resource = subscription.resource().to_string();
        let now = Instant::now();
        let deadline = now
            .checked_add(self.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        debug!(resource = %resource, timeout = ?self.timeout, "Waiting for readiness");

        loop {
            // Deadline is polled before the stream so a late event never wins
            let state = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => WaitState::Failed(Error::cancelled(&resource)),
                _ = &mut expired => WaitState::Failed(Error::timeout(&resource, self.timeout)),
                event = subscription.next() => observe(&resource, event, &predicate),
            };

            match state {
                WaitState::Waiting => continue,
                WaitState::Satisfied(value) => {
                    subscription.release();
                    debug!(resource = %resource, "Readiness predicate satisfied");
                    return Ok(value);
                }
                WaitState::Failed(err) => {
                    subscription.release();
                    warn!(resource = %resource, error = %err, "Readiness wait failed");
                    return Err(err);
                }
            }
        }
    }
}

fn observe<T, P>(
    resource: &str,
    event: Option<Result<ResourceEvent<T>, Error>>,
    predicate: &P,
) -> WaitState<T>
where
    P: Fn(&T) -> bool,
{
    match event {
        Some(Ok(ResourceEvent::Added(state))) | Some(Ok(ResourceEvent::Modified(state))) => {
            if predicate(&state) {
                WaitState::Satisfied(state)
            } else {
                trace!(resource = %resource, "Not ready yet");
                WaitState::Waiting
            }
        }
        Some(Ok(ResourceEvent::Deleted(_))) => WaitState::Failed(Error::resource_watch(
            resource,
            "resource deleted before becoming ready",
        )),
        Some(Err(err @ Error::ResourceWatch { .. })) => WaitState::Failed(err),
        Some(Err(err)) => WaitState::Failed(Error::resource_watch(resource, err.to_string())),
        None => WaitState::Failed(Error::resource_watch(
            resource,
            "event stream closed before resource became ready",
        )),
    }
}
