// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A library to derive the desired port-forwarding rules from the services of a k8s cluster

#![deny(clippy::all, clippy::pedantic)]

mod client;
pub mod resolve;

pub use client::{ClusterError, ServiceSource, cluster_client};

use tracectl::trace_target;
trace_target!("k8s-client", LevelFilter::INFO, &["cluster"]);
