// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Registry of tracing targets.
//!
//! Every crate (or module) declares the targets it logs to with [`trace_target!`](crate::trace_target).
//! The declarations are collected at link time so that the trace control can list them and adjust
//! their log levels without any explicit registration step at startup.

use linkme::distributed_slice;
use tracing_subscriber::filter::LevelFilter;

/// A tracing target declared with [`trace_target!`](crate::trace_target).
#[derive(Debug)]
pub struct TraceTarget {
    /// name the target is known by when configuring tracing
    pub name: &'static str,
    /// the tracing target (module path) events are filtered on
    pub target: &'static str,
    /// initial log level
    pub level: LevelFilter,
    /// tags allow configuring several targets at once
    pub tags: &'static [&'static str],
}

impl TraceTarget {
    #[must_use]
    pub const fn new(
        name: &'static str,
        target: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            target,
            level,
            tags,
        }
    }
}

#[distributed_slice]
pub static TRACE_TARGETS: [TraceTarget];

/// Declare a tracing target for the module where the macro is invoked.
///
/// ```ignore
/// use tracectl::trace_target;
/// trace_target!("routeros", LevelFilter::INFO, &["router"]);
/// ```
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        #[$crate::linkme::distributed_slice($crate::targets::TRACE_TARGETS)]
        #[linkme(crate = $crate::linkme)]
        static TRACE_TARGET: $crate::targets::TraceTarget = {
            #[allow(unused_imports)]
            use $crate::LevelFilter;
            $crate::targets::TraceTarget::new($name, module_path!(), $level, $tags)
        };
    };
}
