// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Application of a [`RuleDiff`] to the router

use rekon::{Create, Remove};
use std::fmt::Display;
use tokio_util::sync::CancellationToken;

use crate::diff::RuleDiff;
use crate::router::ObservedRule;
use crate::rule::PortForwardRule;

#[allow(unused)]
use tracing::{debug, error, info, warn};

/// What applying a [`RuleDiff`] achieved
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
    /// creations were skipped because of a shutdown request
    pub cancelled: bool,
}

impl Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created: {} deleted: {} failed: {}",
            self.created, self.deleted, self.failed
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Apply `diff` with `router`: all deletions first, then all creations. Every rule is
/// attempted regardless of the failures of the others; failed ones are left for the next cycle.
/// No creation is attempted if `cancel` fires during the deletions.
pub async fn apply_diff<R, E>(
    router: &R,
    diff: &RuleDiff,
    cancel: &CancellationToken,
) -> ApplyReport
where
    R: Create<Requirement = PortForwardRule, Outcome = Result<(), E>>
        + Remove<Observation = ObservedRule, Outcome = Result<(), E>>,
    E: Display,
{
    let mut report = ApplyReport::default();

    for observed in &diff.to_delete {
        match router.remove(observed).await {
            Ok(()) => {
                info!("Deleted port-forwarding rule {observed}");
                report.deleted += 1;
            }
            Err(e) => {
                warn!("Failed to delete port-forwarding rule {observed}: {e}");
                report.failed += 1;
            }
        }
    }

    if cancel.is_cancelled() {
        if !diff.to_create.is_empty() {
            info!(
                "Shutdown requested: skipping creation of {} rules",
                diff.to_create.len()
            );
        }
        report.cancelled = true;
        return report;
    }

    for rule in &diff.to_create {
        match router.create(rule).await {
            Ok(()) => {
                info!("Created port-forwarding rule {rule}");
                report.created += 1;
            }
            Err(e) => {
                warn!("Failed to create port-forwarding rule {rule}: {e}");
                report.failed += 1;
            }
        }
    }
    report
}
