// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port-forwarding rules: the rule model, how rules are identified on the router,
//! the computation of the changes to bring the router in sync and their application.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod apply;
pub mod comment;
mod diff;
mod router;
mod rule;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// re-exports
pub use apply::{ApplyReport, apply_diff};
pub use comment::{COMMENT_PREFIX, IdentityError};
pub use diff::RuleDiff;
pub use router::{NatManager, ObservationError, ObservedRule, Shutdown};
pub use rule::{PortForwardRule, Protocol, RuleKey};

use tracectl::trace_target;
trace_target!("portfw", LevelFilter::INFO, &["reconcile"]);
