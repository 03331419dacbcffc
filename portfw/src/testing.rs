// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory router and cluster, for tests

use ahash::RandomState;
use rekon::{Classify, Create, ErrorClass, Observe, Remove};
use routeros::RouterError;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::router::{ObservedRule, Shutdown};
use crate::rule::{PortForwardRule, RuleKey};

struct RouterState {
    rules: BTreeMap<u32, ObservedRule>,
    last_id: u32,
    failing: HashSet<RuleKey, RandomState>,
    unreachable: bool,
    operations: Vec<String>,
    shut_down: bool,
}

impl Default for RouterState {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            last_id: 0,
            failing: HashSet::with_hasher(RandomState::new()),
            unreachable: false,
            operations: Vec::new(),
            shut_down: false,
        }
    }
}

/// A router keeping its port-forwarding rules in memory. Failures can be injected per rule key,
/// or for every operation by making the router unreachable. Clones share the same rules.
#[derive(Clone, Default)]
pub struct FakeRouter {
    state: Arc<Mutex<RouterState>>,
    cancel_on_remove: Option<CancellationToken>,
}

impl FakeRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` after every removal
    #[must_use]
    pub fn cancel_on_remove(mut self, token: CancellationToken) -> Self {
        self.cancel_on_remove = Some(token);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(state: &mut RouterState, rule: PortForwardRule) -> ObservedRule {
        state.last_id += 1;
        let observed = ObservedRule::new(&format!("*{:X}", state.last_id), rule);
        state.rules.insert(state.last_id, observed.clone());
        observed
    }

    /// Add a rule as if created by someone else; it is not recorded as an operation
    #[must_use]
    pub fn insert(&self, rule: PortForwardRule) -> ObservedRule {
        Self::add(&mut self.lock(), rule)
    }

    /// Make every operation on the rules with `key` fail
    pub fn fail_on(&self, key: &RuleKey) {
        self.lock().failing.insert(key.clone());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// The rules the router has, in creation order
    #[must_use]
    pub fn rules(&self) -> Vec<PortForwardRule> {
        self.lock()
            .rules
            .values()
            .map(|observed| observed.rule().clone())
            .collect()
    }

    /// Creations and removals attempted so far
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

fn injected(command: &str) -> RouterError {
    RouterError::Trap {
        command: command.to_string(),
        message: "injected failure".to_string(),
    }
}

impl Observe for FakeRouter {
    type Observation = Result<Vec<ObservedRule>, RouterError>;

    async fn observe(&self) -> Self::Observation {
        let state = self.lock();
        if state.unreachable {
            return Err(RouterError::Closed);
        }
        Ok(state.rules.values().cloned().collect())
    }
}

impl Create for FakeRouter {
    type Requirement = PortForwardRule;
    type Outcome = Result<(), RouterError>;

    async fn create(&self, requirement: &Self::Requirement) -> Self::Outcome {
        let mut state = self.lock();
        if state.unreachable {
            return Err(RouterError::Closed);
        }
        state
            .operations
            .push(format!("create {}", requirement.key()));
        if state.failing.contains(requirement.key()) {
            return Err(injected("/ip/firewall/nat/add"));
        }
        Self::add(&mut state, requirement.clone());
        Ok(())
    }
}

impl Remove for FakeRouter {
    type Observation = ObservedRule;
    type Outcome = Result<(), RouterError>;

    async fn remove(&self, observation: &Self::Observation) -> Self::Outcome {
        let result = {
            let mut state = self.lock();
            if state.unreachable {
                return Err(RouterError::Closed);
            }
            state.operations.push(format!("remove {}", observation.id()));
            if state.failing.contains(observation.rule().key()) {
                Err(injected("/ip/firewall/nat/remove"))
            } else {
                let id = observation.id().trim_start_matches('*');
                let removed = u32::from_str_radix(id, 16)
                    .ok()
                    .and_then(|id| state.rules.remove(&id));
                match removed {
                    Some(_) => Ok(()),
                    None => Err(RouterError::Trap {
                        command: "/ip/firewall/nat/remove".to_string(),
                        message: "no such item".to_string(),
                    }),
                }
            }
        };
        if let Some(token) = &self.cancel_on_remove {
            token.cancel();
        }
        result
    }
}

impl Shutdown for FakeRouter {
    async fn shutdown(&self) {
        self.lock().shut_down = true;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FakeClusterError {
    #[error("Cluster unreachable")]
    Unreachable,
}

impl Classify for FakeClusterError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Retryable
    }
}

#[derive(Default)]
struct ClusterState {
    rules: Vec<PortForwardRule>,
    unreachable: bool,
    reads: usize,
}

/// A cluster whose desired rules are set directly. Clones share the same rules.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    #[must_use]
    pub fn new(rules: Vec<PortForwardRule>) -> Self {
        let cluster = Self::default();
        cluster.set_rules(rules);
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_rules(&self, rules: Vec<PortForwardRule>) {
        self.lock().rules = rules;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Number of times the desired rules were read
    #[must_use]
    pub fn reads(&self) -> usize {
        self.lock().reads
    }
}

impl Observe for FakeCluster {
    type Observation = Result<Vec<PortForwardRule>, FakeClusterError>;

    async fn observe(&self) -> Self::Observation {
        let mut state = self.lock();
        state.reads += 1;
        if state.unreachable {
            return Err(FakeClusterError::Unreachable);
        }
        Ok(state.rules.clone())
    }
}
