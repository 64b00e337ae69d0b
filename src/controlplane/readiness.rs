//! Readiness Waiter
//!
//! Polls pods behind a label selector until one of them is fully ready.
//! The delay doubles after every failed poll; termination is bounded by the
//! attempt count only.

use crate::config::ReadinessConfig;
use crate::domain::ports::{ControlPlaneRef, Selector, SleeperRef};
use crate::error::Result;
use k8s_openapi::api::core::v1::Pod;
use std::time::Duration;
use tracing::{debug, info, warn};

const RUNNING: &str = "Running";

// =============================================================================
// Policy
// =============================================================================

/// Attempt budget and delay unit for readiness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&ReadinessConfig> for ReadinessPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
        }
    }
}

impl ReadinessPolicy {
    /// Delay after the failed attempt `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

// =============================================================================
// Pod Status
// =============================================================================

/// Running, and every declared container reports ready
pub fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    let Some(statuses) = status.container_statuses.as_ref() else {
        return false;
    };

    let declared = pod.spec.as_ref().map(|s| s.containers.len()).unwrap_or(0);
    let ready = statuses.iter().filter(|cs| cs.ready).count();

    status.phase.as_deref() == Some(RUNNING) && ready == declared
}

pub fn pod_is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == RUNNING)
        .unwrap_or(false)
}

// =============================================================================
// Waiter
// =============================================================================

/// Polls pod status with exponential backoff
pub struct ReadinessWaiter {
    control_plane: ControlPlaneRef,
    sleeper: SleeperRef,
    namespace: String,
    policy: ReadinessPolicy,
}

impl ReadinessWaiter {
    pub fn new(
        control_plane: ControlPlaneRef,
        sleeper: SleeperRef,
        namespace: impl Into<String>,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            control_plane,
            sleeper,
            namespace: namespace.into(),
            policy,
        }
    }

    pub fn policy(&self) -> ReadinessPolicy {
        self.policy
    }

    /// Whether any pod behind the selector is in phase `Running`
    pub async fn is_running(&self, selector: &Selector) -> Result<bool> {
        let pods = self
            .control_plane
            .list_pods(&self.namespace, selector)
            .await?;
        Ok(pods.iter().any(pod_is_running))
    }

    /// Poll until a pod behind the selector is ready.
    ///
    /// Returns `false` once the attempt budget is spent; query failures count
    /// as failed attempts.
    pub async fn wait_until_ready(&self, selector: &Selector, description: &str) -> bool {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            info!(%selector, attempt, "Waiting for {} to come up", description);

            match self.control_plane.list_pods(&self.namespace, selector).await {
                Ok(pods) if pods.iter().any(pod_is_ready) => {
                    info!(%selector, attempt, "{} is ready", description);
                    return true;
                }
                Ok(pods) => debug!(%selector, pods = pods.len(), "no ready pod yet"),
                Err(e) => warn!(%selector, error = %e, "readiness query failed"),
            }

            if attempt < max_attempts {
                self.sleeper.sleep(self.policy.delay_after(attempt)).await;
            }
        }

        warn!(%selector, max_attempts, "{} did not come up", description);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::client::memory::{InMemoryControlPlane, RecordingSleeper};
    use crate::domain::ports::ResourceKind;
    use std::sync::Arc;

    fn waiter(
        cp: &Arc<InMemoryControlPlane>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> ReadinessWaiter {
        ReadinessWaiter::new(
            cp.clone(),
            sleeper.clone(),
            "quobyte",
            ReadinessPolicy::default(),
        )
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = ReadinessPolicy::default();
        let delays: Vec<Duration> = (1..=5).map(|a| policy.delay_after(a)).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16]));
        assert_eq!(policy.delay_after(20), Duration::from_secs(1 << 19));
        assert_eq!(policy.delay_after(40), Duration::MAX);
    }

    #[test]
    fn test_policy_from_config() {
        let config = ReadinessConfig {
            max_attempts: 3,
            base_delay_secs: 15,
        };
        let policy = ReadinessPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(2), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_ready_after_backoff() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.add_pod_ready_after("registry-0", &[("role", "registry")], 3);
        let sleeper = Arc::new(RecordingSleeper::default());

        let ready = waiter(&cp, &sleeper)
            .wait_until_ready(&Selector::by_label("role", "registry"), "Bootstrap registry")
            .await;

        assert!(ready);
        assert_eq!(sleeper.delays(), secs(&[1, 2, 4]));
        assert_eq!(cp.pod_polls("role=registry"), 4);
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let sleeper = Arc::new(RecordingSleeper::default());

        let ready = waiter(&cp, &sleeper)
            .wait_until_ready(&Selector::by_label("role", "webconsole"), "API and Webconsole")
            .await;

        assert!(!ready);
        assert_eq!(cp.pod_polls("role=webconsole"), 20);

        let delays = sleeper.delays();
        assert_eq!(delays.len(), 19);
        assert_eq!(&delays[..5], &secs(&[1, 2, 4, 8, 16])[..]);
        assert_eq!(delays[18], Duration::from_secs(1 << 18));
    }

    #[tokio::test]
    async fn test_partial_readiness_does_not_count() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.add_pod("webconsole-0", &[("role", "webconsole")], "Running", 1, 2);
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = ReadinessPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        };
        let waiter = ReadinessWaiter::new(cp.clone(), sleeper.clone(), "quobyte", policy);

        assert!(
            !waiter
                .wait_until_ready(&Selector::by_label("role", "webconsole"), "webconsole")
                .await
        );
        assert!(waiter
            .is_running(&Selector::by_label("role", "webconsole"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_query_failures_count_as_attempts() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.add_pod("registry-0", &[("role", "registry")], "Running", 1, 1);
        cp.fail_reads(ResourceKind::Pod);
        let sleeper = Arc::new(RecordingSleeper::default());

        let waiter = waiter(&cp, &sleeper);
        assert!(
            !waiter
                .wait_until_ready(&Selector::by_label("role", "registry"), "registry")
                .await
        );
        assert!(waiter
            .is_running(&Selector::by_label("role", "registry"))
            .await
            .is_err());
    }

    #[test]
    fn test_pod_without_status_not_ready() {
        assert!(!pod_is_ready(&Pod::default()));
        assert!(!pod_is_running(&Pod::default()));
    }
}
