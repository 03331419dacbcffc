// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The reconciliation loop

use portfw::{ApplyReport, ObservedRule, PortForwardRule, RuleDiff, Shutdown, apply_diff};
use rekon::{Classify, Create, ErrorClass, Observe, Remove};
use std::fmt::Display;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;

#[allow(unused)]
use tracing::{debug, error, info, warn};

/// Where the reconciler is in its cycle
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum Phase {
    Idle,
    ReadingState,
    Diffing,
    Applying,
    Sleeping,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError<C, R> {
    #[error("Failed to read the desired rules: {0}")]
    Cluster(C),
    #[error("Failed to read the rules of the router: {0}")]
    Router(R),
    #[error("Cycle cancelled")]
    Cancelled,
}

impl<C: Classify, R: Classify> Classify for CycleError<C, R> {
    fn class(&self) -> ErrorClass {
        match self {
            CycleError::Cluster(e) => e.class(),
            CycleError::Router(e) => e.class(),
            CycleError::Cancelled => ErrorClass::Ignorable,
        }
    }
}

/// Outcome of a completed cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub desired: usize,
    pub actual: usize,
    pub applied: ApplyReport,
}

impl Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "desired: {} actual: {} {}",
            self.desired, self.actual, self.applied
        )
    }
}

#[derive(Clone, Debug)]
pub struct ReconcilerParams {
    /// time between cycles
    pub interval: Duration,
    /// longest time between cycles when they fail
    pub max_backoff: Duration,
}

/// Keeps the port-forwarding rules of a router in sync with the rules desired by a cluster.
/// `cluster` provides the desired rules and `router` holds the actual ones.
pub struct Reconciler<C, R> {
    cluster: C,
    router: R,
    backoff: Backoff,
    phase: Phase,
}

impl<C, R, CE, RE> Reconciler<C, R>
where
    C: Observe<Observation = Result<Vec<PortForwardRule>, CE>>,
    R: Observe<Observation = Result<Vec<ObservedRule>, RE>>
        + Create<Requirement = PortForwardRule, Outcome = Result<(), RE>>
        + Remove<Observation = ObservedRule, Outcome = Result<(), RE>>
        + Shutdown,
    CE: Classify + Display,
    RE: Classify + Display,
{
    #[must_use]
    pub fn new(cluster: C, router: R, params: &ReconcilerParams) -> Self {
        Self {
            cluster,
            router,
            backoff: Backoff::new(params.interval, params.max_backoff),
            phase: Phase::Idle,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{} -> {phase}", self.phase);
        self.phase = phase;
    }

    /// Run a single cycle: read both states, compute their difference and apply it.
    /// The reads are abandoned if `cancel` fires while they are ongoing.
    pub async fn cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError<CE, RE>> {
        self.enter(Phase::ReadingState);
        let reads = async { tokio::join!(self.cluster.observe(), self.router.observe()) };
        let (desired, actual) = tokio::select! {
            () = cancel.cancelled() => return Err(CycleError::Cancelled),
            states = reads => states,
        };
        let (desired, actual) = match (desired, actual) {
            (Ok(desired), Ok(actual)) => (desired, actual),
            (Err(e), Ok(_)) => return Err(CycleError::Cluster(e)),
            (Ok(_), Err(e)) => return Err(CycleError::Router(e)),
            (Err(e), Err(router)) => {
                warn!("Failed to read the rules of the router: {router}");
                return Err(CycleError::Cluster(e));
            }
        };

        self.enter(Phase::Diffing);
        let diff = RuleDiff::compute(&desired, &actual);
        debug!(
            "{} rules to delete, {} rules to create",
            diff.to_delete.len(),
            diff.to_create.len()
        );

        self.enter(Phase::Applying);
        let applied = apply_diff(&self.router, &diff, cancel).await;
        Ok(CycleReport {
            desired: desired.len(),
            actual: actual.len(),
            applied,
        })
    }

    /// Run cycles until `cancel` fires, then shut down the router sessions.
    /// Failed cycles are retried with an increasing delay.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Starting reconciliation");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = match self.cycle(&cancel).await {
                Ok(report) => {
                    info!("Reconciliation cycle done: {report}");
                    self.backoff.reset();
                    self.backoff.delay()
                }
                Err(CycleError::Cancelled) => break,
                Err(e) => {
                    let delay = self.backoff.failed();
                    if e.is_fatal() {
                        error!("Reconciliation cycle failed: {e}. Retrying in {delay:?}");
                    } else {
                        warn!("Reconciliation cycle failed: {e}. Retrying in {delay:?}");
                    }
                    delay
                }
            };
            self.enter(Phase::Sleeping);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        info!("Stopping reconciliation");
        self.router.shutdown().await;
        self.enter(Phase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfw::testing::{FakeCluster, FakeRouter};
    use portfw::{Protocol, RuleKey};
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use std::num::NonZero;
    use tracing_test::traced_test;

    fn rule(name: &str, port: u16, ip: u8) -> PortForwardRule {
        let port = NonZero::new(port).unwrap();
        let key = RuleKey::new("default", name, port, Protocol::Tcp).unwrap();
        PortForwardRule::new(key, Ipv4Addr::new(192, 168, 1, ip), port)
    }

    fn params(millis: u64) -> ReconcilerParams {
        ReconcilerParams {
            interval: Duration::from_millis(millis),
            max_backoff: Duration::from_millis(4 * millis),
        }
    }

    fn reconciler(
        cluster: &FakeCluster,
        router: &FakeRouter,
    ) -> Reconciler<FakeCluster, FakeRouter> {
        Reconciler::new(cluster.clone(), router.clone(), &params(5))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_second_cycle_is_idle() {
        let cluster = FakeCluster::new(vec![rule("web", 80, 10), rule("web", 443, 10)]);
        let router = FakeRouter::new();
        let mut reconciler = reconciler(&cluster, &router);
        let cancel = CancellationToken::new();

        let report = reconciler.cycle(&cancel).await.unwrap();
        assert_eq!((report.desired, report.actual), (2, 0));
        assert_eq!(report.applied.created, 2);
        assert_eq!(reconciler.phase(), Phase::Applying);

        router.clear_operations();
        let report = reconciler.cycle(&cancel).await.unwrap();
        assert_eq!((report.desired, report.actual), (2, 2));
        assert_eq!(report.applied, ApplyReport::default());
        assert!(router.operations().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_scale_down_and_address_change() {
        let cluster = FakeCluster::new(vec![rule("web", 80, 10), rule("dns", 53, 11)]);
        let router = FakeRouter::new();
        let mut reconciler = reconciler(&cluster, &router);
        let cancel = CancellationToken::new();
        reconciler.cycle(&cancel).await.unwrap();

        // dns goes away and web moves to another address
        cluster.set_rules(vec![rule("web", 80, 12)]);
        router.clear_operations();
        let report = reconciler.cycle(&cancel).await.unwrap();
        assert_eq!((report.applied.deleted, report.applied.created), (2, 1));
        assert_eq!(
            router.operations(),
            vec!["remove *1", "remove *2", "create default/web tcp/80"]
        );
        assert_eq!(router.rules(), vec![rule("web", 80, 12)]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_partial_failure_is_retried() {
        let broken = rule("broken", 81, 10);
        let cluster = FakeCluster::new(vec![rule("web", 80, 10), broken.clone()]);
        let router = FakeRouter::new();
        router.fail_on(broken.key());
        let mut reconciler = reconciler(&cluster, &router);
        let cancel = CancellationToken::new();

        let report = reconciler.cycle(&cancel).await.unwrap();
        assert_eq!((report.applied.created, report.applied.failed), (1, 1));

        // the failed rule is attempted again on the next cycle, and only that one
        router.clear_operations();
        let report = reconciler.cycle(&cancel).await.unwrap();
        assert_eq!(report.applied.failed, 1);
        assert_eq!(router.operations(), vec!["create default/broken tcp/81"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_read_failures() {
        let cluster = FakeCluster::new(vec![rule("web", 80, 10)]);
        let router = FakeRouter::new();
        let mut reconciler = reconciler(&cluster, &router);
        let cancel = CancellationToken::new();

        cluster.set_unreachable(true);
        let err = reconciler.cycle(&cancel).await.unwrap_err();
        assert!(matches!(err, CycleError::Cluster(_)));
        assert!(err.is_retryable());

        cluster.set_unreachable(false);
        router.set_unreachable(true);
        let err = reconciler.cycle(&cancel).await.unwrap_err();
        assert!(matches!(err, CycleError::Router(_)));
        assert!(err.is_retryable());

        // nothing is changed on failed reads
        assert!(router.operations().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_run_until_cancelled() {
        let cluster = FakeCluster::new(vec![rule("web", 80, 10)]);
        let router = FakeRouter::new();
        let cancel = CancellationToken::new();
        let stop = async {
            while cluster.reads() < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            cancel.cancel();
        };
        tokio::join!(reconciler(&cluster, &router).run(cancel.clone()), stop);

        assert!(router.is_shut_down());
        assert_eq!(router.rules(), vec![rule("web", 80, 10)]);
        assert_eq!(router.operations(), vec!["create default/web tcp/80"]);
        assert!(logs_contain("Reconciliation cycle done"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_run_backs_off_on_failure() {
        let cluster = FakeCluster::new(vec![]);
        cluster.set_unreachable(true);
        let router = FakeRouter::new();
        let cancel = CancellationToken::new();
        let stop = async {
            while cluster.reads() < 4 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            cancel.cancel();
        };
        tokio::join!(reconciler(&cluster, &router).run(cancel.clone()), stop);

        assert!(router.is_shut_down());
        assert!(logs_contain("Retrying in 10ms"));
        assert!(logs_contain("Retrying in 20ms"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_cancelled_before_start() {
        let cluster = FakeCluster::new(vec![rule("web", 80, 10)]);
        let router = FakeRouter::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        reconciler(&cluster, &router).run(cancel).await;
        assert_eq!(cluster.reads(), 0);
        assert!(router.rules().is_empty());
        assert!(router.is_shut_down());
    }
}
