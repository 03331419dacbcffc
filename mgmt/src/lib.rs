// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconciliation of the port-forwarding rules of a router with the services of a cluster

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod backoff;
mod launch;
mod reconcile;

pub use backoff::Backoff;
pub use launch::{LaunchError, MgmtParams, start_mgmt};
pub use reconcile::{CycleError, CycleReport, Phase, Reconciler, ReconcilerParams};

use tracectl::trace_target;
trace_target!("mgmt", LevelFilter::INFO, &["reconcile"]);
