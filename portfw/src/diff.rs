// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Differences between the desired and the actual port-forwarding rules

use ahash::RandomState;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::router::ObservedRule;
use crate::rule::{PortForwardRule, RuleKey};

#[allow(unused)]
use tracing::{debug, trace};

/// The changes needed to turn the actual rules into the desired ones
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleDiff {
    pub to_create: Vec<PortForwardRule>,
    pub to_delete: Vec<ObservedRule>,
}

impl RuleDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }

    /// Compute the rules to create (desired but not present) and the rules to delete (present
    /// but not desired). A present rule is kept if its key is desired with the same destination
    /// address; a differing forwarded port alone does not replace it.
    ///
    /// If several desired rules share a key, the one with the lowest address wins. If several
    /// present rules share a key, only the first one found is kept.
    /// The output is sorted by key whatever the order of the inputs.
    #[must_use]
    pub fn compute(desired: &[PortForwardRule], actual: &[ObservedRule]) -> Self {
        let mut wanted: HashMap<&RuleKey, &PortForwardRule, RandomState> =
            HashMap::with_capacity_and_hasher(desired.len(), RandomState::new());
        for rule in desired {
            match wanted.entry(rule.key()) {
                Entry::Vacant(entry) => {
                    entry.insert(rule);
                }
                Entry::Occupied(mut entry) => {
                    debug!("Duplicate desired rule for {}", rule.key());
                    let current = entry.get();
                    if (rule.dst_ip(), rule.to_port()) < (current.dst_ip(), current.to_port()) {
                        entry.insert(rule);
                    }
                }
            }
        }

        let mut kept: HashSet<&RuleKey, RandomState> = HashSet::with_hasher(RandomState::new());
        let mut seen_ids: HashSet<&str, RandomState> = HashSet::with_hasher(RandomState::new());
        let mut to_delete = Vec::new();
        for observed in actual {
            if !seen_ids.insert(observed.id()) {
                continue;
            }
            let key = observed.rule().key();
            let keep = wanted
                .get(key)
                .is_some_and(|rule| rule.matches(observed.rule()))
                && kept.insert(key);
            if keep {
                trace!("Keeping {observed}");
            } else {
                to_delete.push(observed.clone());
            }
        }

        let mut to_create: Vec<PortForwardRule> = wanted
            .into_iter()
            .filter(|(key, _)| !kept.contains(key))
            .map(|(_, rule)| rule.clone())
            .collect();

        to_create.sort_by(|a, b| a.key().cmp(b.key()));
        to_delete.sort_by(|a, b| {
            a.rule()
                .key()
                .cmp(b.rule().key())
                .then_with(|| a.id().cmp(b.id()))
        });
        Self {
            to_create,
            to_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use std::num::NonZero;

    use crate::rule::Protocol;

    fn rule(name: &str, port: u16, ip: u8) -> PortForwardRule {
        let port = NonZero::new(port).unwrap();
        let key = RuleKey::new("default", name, port, Protocol::Tcp).unwrap();
        PortForwardRule::new(key, Ipv4Addr::new(192, 168, 1, ip), port)
    }

    fn observed(rules: &[PortForwardRule]) -> Vec<ObservedRule> {
        rules
            .iter()
            .enumerate()
            .map(|(n, rule)| ObservedRule::new(&format!("*{n:X}"), rule.clone()))
            .collect()
    }

    // apply a diff to the observed rules as a router would
    fn apply(actual: &[ObservedRule], diff: &RuleDiff) -> Vec<ObservedRule> {
        let mut result: Vec<ObservedRule> = actual
            .iter()
            .filter(|o| !diff.to_delete.iter().any(|d| d.id() == o.id()))
            .cloned()
            .collect();
        for (n, rule) in diff.to_create.iter().enumerate() {
            result.push(ObservedRule::new(&format!("*new{n}"), rule.clone()));
        }
        result
    }

    #[test]
    fn test_scale_up_and_down() {
        let desired = vec![rule("web", 80, 10), rule("web", 443, 10)];

        // nothing on the router yet
        let diff = RuleDiff::compute(&desired, &[]);
        assert_eq!(diff.to_create, desired);
        assert!(diff.to_delete.is_empty());

        // in sync
        let actual = observed(&desired);
        assert!(RuleDiff::compute(&desired, &actual).is_empty());

        // service deleted
        let diff = RuleDiff::compute(&[], &actual);
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_delete, actual);
    }

    #[test]
    fn test_address_change_replaces_rule() {
        let actual = observed(&[rule("web", 80, 10)]);
        let desired = vec![rule("web", 80, 11)];
        let diff = RuleDiff::compute(&desired, &actual);
        assert_eq!(diff.to_delete, actual);
        assert_eq!(diff.to_create, desired);
    }

    #[test]
    fn test_forwarded_port_drift_is_ignored() {
        let actual = observed(&[rule("web", 80, 10)]);
        let drifted = PortForwardRule::new(
            actual[0].rule().key().clone(),
            actual[0].rule().dst_ip(),
            NonZero::new(8080).unwrap(),
        );
        assert!(RuleDiff::compute(&[drifted], &actual).is_empty());
    }

    #[test]
    fn test_duplicates() {
        // the same rule twice on the router: the second one goes away
        let actual = observed(&[rule("web", 80, 10), rule("web", 80, 10)]);
        let desired = vec![rule("web", 80, 10), rule("web", 80, 10)];
        let diff = RuleDiff::compute(&desired, &actual);
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_delete, vec![actual[1].clone()]);

        // the same observation twice
        let once = observed(&[rule("web", 80, 10)]);
        let twice = vec![once[0].clone(), once[0].clone()];
        assert!(RuleDiff::compute(&desired, &twice).is_empty());
    }

    #[test]
    fn test_diff_properties() {
        type Spec = Vec<(u8, u8, u8)>;
        let build = |spec: &Spec| -> Vec<PortForwardRule> {
            spec.iter()
                .map(|(name, port, ip)| {
                    rule(&format!("svc{}", name % 4), u16::from(port % 8) + 1, ip % 3)
                })
                .collect()
        };
        bolero::check!()
            .with_type::<(Spec, Spec)>()
            .for_each(|(desired, actual)| {
                let desired = build(desired);
                let actual = observed(&build(actual));
                let diff = RuleDiff::compute(&desired, &actual);

                // nothing both created and kept
                for rule in &diff.to_create {
                    assert!(desired.iter().any(|d| d == rule));
                    let kept = actual
                        .iter()
                        .any(|a| a.rule().matches(rule) && !diff.to_delete.contains(a));
                    assert!(!kept);
                }
                // only observed rules get deleted
                for deleted in &diff.to_delete {
                    assert!(actual.contains(deleted));
                }

                // once applied, there is nothing left to do
                let after = apply(&actual, &diff);
                assert!(RuleDiff::compute(&desired, &after).is_empty());

                // the order of the inputs does not matter
                let mut reversed_desired = desired.clone();
                reversed_desired.reverse();
                let mut reversed_actual = actual.clone();
                reversed_actual.reverse();
                let other = RuleDiff::compute(&reversed_desired, &reversed_actual);
                assert_eq!(other.to_create, diff.to_create);
                assert_eq!(other.to_delete.len(), diff.to_delete.len());
            });
    }
}
