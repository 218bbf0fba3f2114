//! Rotation scheduling
//!
//! [`reconcile`] is one step for one policy: read the pre-rotation time,
//! rotate if it has passed, and work out when to look again. [`Scheduler`]
//! runs that step in a loop, one task per policy, until cancelled.
//!
//! Each policy has exactly one task, so a policy is never rotated
//! concurrently by this process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Error;
use crate::rotator::Rotator;

/// Result of one reconcile step.
#[derive(Debug)]
pub enum Reconciled {
    /// Credential still valid; nothing done
    Fresh {
        /// Time until the pre-rotation time
        requeue_after: Duration,
    },
    /// Credential rotated
    Rotated {
        /// New expiry
        expires_at: DateTime<Utc>,
        /// Time until the next pre-rotation time, or the failure delay when
        /// the new credential is already inside the window
        requeue_after: Duration,
    },
    /// Reading or rotating failed; the stored secret is untouched
    Failed {
        /// What went wrong
        error: Error,
        /// Failure delay
        requeue_after: Duration,
    },
}

impl Reconciled {
    /// Delay before the next step.
    #[must_use]
    pub fn requeue_after(&self) -> Duration {
        match self {
            Self::Fresh { requeue_after }
            | Self::Rotated { requeue_after, .. }
            | Self::Failed { requeue_after, .. } => *requeue_after,
        }
    }
}

fn until(t: DateTime<Utc>) -> Option<Duration> {
    (t - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

/// Run one reconcile step for `rotator`.
pub async fn reconcile(
    rotator: &dyn Rotator,
    window: Duration,
    failure_requeue: Duration,
) -> Reconciled {
    let namespace = rotator.namespace();
    let policy = rotator.policy_name();

    let pre_rotation_time = match rotator.pre_rotation_time().await {
        Ok(t) => t,
        Err(error) => {
            error!(
                namespace = %namespace,
                policy = %policy,
                error = %error,
                retry_in_secs = failure_requeue.as_secs(),
                "Failed to get rotation time"
            );
            return Reconciled::Failed {
                error,
                requeue_after: failure_requeue,
            };
        }
    };

    if !rotator.is_expired(pre_rotation_time) {
        let requeue_after = until(pre_rotation_time).unwrap_or(failure_requeue);
        info!(
            namespace = %namespace,
            policy = %policy,
            provider = %rotator.provider(),
            renew_in_secs = requeue_after.as_secs(),
            "Credential not yet due for rotation"
        );
        return Reconciled::Fresh { requeue_after };
    }

    let expires_at = match rotator.rotate().await {
        Ok(t) => t,
        Err(error) => {
            error!(
                namespace = %namespace,
                policy = %policy,
                error = %error,
                retry_in_secs = failure_requeue.as_secs(),
                "Failed to rotate credential"
            );
            return Reconciled::Failed {
                error,
                requeue_after: failure_requeue,
            };
        }
    };

    let next_rotation = chrono::TimeDelta::from_std(window)
        .ok()
        .and_then(|w| expires_at.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let requeue_after = if let Some(d) = until(next_rotation) {
        info!(
            namespace = %namespace,
            policy = %policy,
            provider = %rotator.provider(),
            expires_at = %expires_at,
            renew_in_secs = d.as_secs(),
            "Rotated credential"
        );
        d
    } else {
        error!(
            namespace = %namespace,
            policy = %policy,
            expires_at = %expires_at,
            "Newly rotated credential is already inside the pre-rotation window"
        );
        failure_requeue
    };

    Reconciled::Rotated {
        expires_at,
        requeue_after,
    }
}

/// Drives one reconcile loop per rotator.
pub struct Scheduler {
    rotators: Vec<Arc<dyn Rotator>>,
    window: Duration,
    failure_requeue: Duration,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(rotators: Vec<Arc<dyn Rotator>>, window: Duration, failure_requeue: Duration) -> Self {
        Self {
            rotators,
            window,
            failure_requeue,
        }
    }

    /// Number of policies scheduled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rotators.len()
    }

    /// Whether there is nothing to schedule.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rotators.is_empty()
    }

    /// Spawn one task per policy. Tasks exit when `shutdown` is cancelled.
    #[must_use]
    pub fn spawn(self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.rotators
            .into_iter()
            .map(|rotator| {
                let shutdown = shutdown.clone();
                let window = self.window;
                let failure_requeue = self.failure_requeue;
                tokio::spawn(async move {
                    run_policy(rotator, window, failure_requeue, shutdown).await;
                })
            })
            .collect()
    }

    /// Run until `shutdown` is cancelled and every task has stopped.
    pub async fn run(self, shutdown: CancellationToken) {
        let handles = self.spawn(&shutdown);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Rotation task panicked");
            }
        }
    }
}

async fn run_policy(
    rotator: Arc<dyn Rotator>,
    window: Duration,
    failure_requeue: Duration,
    shutdown: CancellationToken,
) {
    info!(
        namespace = %rotator.namespace(),
        policy = %rotator.policy_name(),
        provider = %rotator.provider(),
        "Starting rotation loop"
    );
    loop {
        let delay = tokio::select! {
            () = shutdown.cancelled() => break,
            outcome = reconcile(rotator.as_ref(), window, failure_requeue) => outcome.requeue_after(),
        };
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    info!(
        namespace = %rotator.namespace(),
        policy = %rotator.policy_name(),
        "Rotation loop stopped"
    );
}
