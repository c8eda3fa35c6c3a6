//! Post-relocation verification
//!
//! `classify` and `check` are single shot. `Waiter` bounds the time spent
//! waiting for the cluster between steps; it never decides success itself.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::types::{ObjectRef, Outcome, OutcomeStatus, PodPhase};
use crate::error::{Error, Result, Step};
use crate::k8s::ClusterApi;

/// Health of a pod after relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    Healthy,
    Pending,
    Failed { reason: String },
}

impl Convergence {
    /// Running and Pending both count as healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, Convergence::Healthy | Convergence::Pending)
    }

    pub fn into_status(self) -> OutcomeStatus {
        match self {
            Convergence::Healthy => OutcomeStatus::Success,
            Convergence::Pending => OutcomeStatus::Pending,
            Convergence::Failed { reason } => OutcomeStatus::Failed { reason },
        }
    }
}

pub fn classify(pod: &Pod) -> Convergence {
    match PodPhase::of(pod) {
        PodPhase::Running => Convergence::Healthy,
        PodPhase::Pending => Convergence::Pending,
        other => Convergence::Failed {
            reason: other.to_string(),
        },
    }
}

/// Fetch the pod once and classify it
#[instrument(skip(client))]
pub async fn check<C: ClusterApi + ?Sized>(client: &C, namespace: &str, name: &str) -> Result<Outcome> {
    let pod = client.get_pod(namespace, name).await?;
    let convergence = classify(&pod);
    debug!(?convergence, "Checked pod");
    Ok(Outcome::observed(&pod, convergence.into_status()))
}

/// Bounded polling with cancellation
#[derive(Debug, Clone)]
pub struct Waiter {
    interval: Duration,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `probe` until it yields a value, `timeout` elapses or the wait is
    /// cancelled. Returns `Ok(None)` on timeout. Probe errors end the wait.
    pub async fn poll<T, F, Fut>(&self, step: Step, timeout: Duration, mut probe: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        // A timeout past the clock's range leaves only the attempt bound
        let deadline = Instant::now().checked_add(timeout);
        let max_attempts = max_attempts(timeout, self.interval);

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled { step });
            }

            if let Some(value) = probe().await? {
                debug!(%step, attempt, "Wait satisfied");
                return Ok(Some(value));
            }

            let now = Instant::now();
            if deadline.map_or(false, |d| now >= d) || attempt == max_attempts {
                break;
            }
            let pause = match deadline {
                Some(d) => self.interval.min(d - now),
                None => self.interval,
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled { step }),
                _ = tokio::time::sleep(pause) => {}
            }
        }

        warn!(%step, ?timeout, "Gave up waiting");
        Ok(None)
    }

    /// Wait until the pod no longer exists. `Ok(false)` if it is still there
    /// at the deadline.
    #[instrument(skip(self, client))]
    pub async fn until_gone<C: ClusterApi + ?Sized>(
        &self,
        client: &C,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let gone = self
            .poll(Step::WaitGone, timeout, || async move {
                match client.get_pod(namespace, name).await {
                    Ok(_) => Ok(None),
                    Err(e) if e.is_not_found() => Ok(Some(())),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(gone.is_some())
    }

    /// Wait until the pod runs or reaches a terminal phase, then classify it
    /// once.
    #[instrument(skip(self, client))]
    pub async fn until_settled<C: ClusterApi + ?Sized>(
        &self,
        client: &C,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Outcome> {
        self.poll(Step::WaitSettled, timeout, || async move {
            match client.get_pod(namespace, name).await {
                Ok(pod) => {
                    let phase = PodPhase::of(&pod);
                    Ok((phase == PodPhase::Running || phase.is_terminal()).then_some(()))
                }
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;

        match check(client, namespace, name).await {
            Err(e) if e.is_not_found() => Ok(Outcome::failed(
                ObjectRef::new(namespace, name),
                "pod disappeared after creation",
            )),
            other => other,
        }
    }
}

fn max_attempts(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let ratio = timeout.as_millis() / interval.as_millis().max(1);
    u32::try_from(ratio).unwrap_or(u32::MAX).saturating_add(1)
}
