//! Rollout verification
//!
//! [`RolloutTracker`] is a pure state machine fed one observation per tick;
//! [`verify_rollout`] drives it with a bounded sleep-then-recheck loop. The
//! cancellation token is only consulted between polls, never while a status
//! request is in flight.

use crate::backend::{BackendError, ControlPlane};
use crate::error::{DeployError, Result, Stage};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Replica counts of a workload at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkloadStatus {
    pub desired: u32,
    pub ready: u32,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ready, self.desired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    Pending,
    Ready,
    TimedOut,
}

impl RolloutState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RolloutState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RolloutTracker {
    timeout: Duration,
    state: RolloutState,
    last: Option<WorkloadStatus>,
    observations: u32,
}

impl RolloutTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: RolloutState::Pending,
            last: None,
            observations: 0,
        }
    }

    /// Feed one poll result. `None` means the workload is not visible yet.
    /// Terminal states are sticky.
    pub fn observe(&mut self, status: Option<WorkloadStatus>, elapsed: Duration) -> RolloutState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.observations += 1;

        if let Some(status) = status {
            self.last = Some(status);
            if status.ready >= status.desired {
                self.state = RolloutState::Ready;
                return self.state;
            }
        }

        if elapsed >= self.timeout {
            self.state = RolloutState::TimedOut;
        }
        self.state
    }

    pub fn state(&self) -> RolloutState {
        self.state
    }

    /// Last observed counts; 0/0 if the workload never became visible
    pub fn last_status(&self) -> WorkloadStatus {
        self.last.unwrap_or_default()
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }
}

/// Outcome of a successful rollout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutOutcome {
    pub status: WorkloadStatus,
    pub elapsed: Duration,
    pub polls: u32,
}

/// Poll `workload` until it is ready, the policy's bound elapses, or the
/// run is cancelled
pub async fn verify_rollout(
    plane: &dyn ControlPlane,
    namespace: &str,
    workload: &str,
    policy: RolloutPolicy,
    cancel: &CancellationToken,
) -> Result<RolloutOutcome> {
    let started = Instant::now();
    let mut tracker = RolloutTracker::new(policy.timeout);

    loop {
        if cancel.is_cancelled() {
            return Err(DeployError::Interrupted {
                stage: Stage::Rollout,
            });
        }

        let status = plane
            .workload_status(namespace, workload)
            .await
            .map_err(|e| status_error(workload, e))?;
        let elapsed = started.elapsed();

        match tracker.observe(status, elapsed) {
            RolloutState::Ready => {
                let status = tracker.last_status();
                info!(workload, %status, elapsed_secs = elapsed.as_secs(), "rollout ready");
                return Ok(RolloutOutcome {
                    status,
                    elapsed,
                    polls: tracker.observations(),
                });
            }
            RolloutState::TimedOut => {
                let last = tracker.last_status();
                return Err(DeployError::RolloutTimeout {
                    workload: workload.to_string(),
                    desired: last.desired,
                    ready: last.ready,
                    elapsed,
                });
            }
            RolloutState::Pending => {
                match status {
                    Some(s) => debug!(workload, status = %s, "rollout pending"),
                    None => debug!(workload, "workload not visible yet"),
                }
                // never sleep past the bound
                let wait = policy.interval.min(policy.timeout.saturating_sub(elapsed));
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(DeployError::Interrupted { stage: Stage::Rollout });
                    }
                    () = sleep(wait) => {}
                }
            }
        }
    }
}

fn status_error(workload: &str, err: BackendError) -> DeployError {
    match err {
        BackendError::Unauthorized { message } => DeployError::AuthenticationFailure {
            stage: Stage::Rollout,
            entity: format!("deployment/{workload}"),
            message,
        },
        BackendError::Failed { message } => DeployError::ControlPlane {
            stage: Stage::Rollout,
            operation: format!("reading status of deployment/{workload}"),
            message,
        },
    }
}
