// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Desired port-forwarding rules from the services of the cluster

use k8s_openapi::api::core::v1::Service;
use portfw::{PortForwardRule, Protocol, RuleKey};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::num::NonZero;
use std::str::FromStr;

#[allow(unused)]
use tracing::{debug, trace, warn};

const LOAD_BALANCER: &str = "LoadBalancer";

/// Tell if `annotations` opt in through `annotation`. The value is trimmed and case-folded;
/// anything other than `true` opts out.
#[must_use]
pub fn is_enabled(annotations: Option<&BTreeMap<String, String>>, annotation: &str) -> bool {
    annotations
        .and_then(|annotations| annotations.get(annotation))
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// The first IPv4 address assigned to the load-balancer of `service`, if any
fn external_address(service: &Service) -> Option<Ipv4Addr> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .filter_map(|ingress| ingress.ip.as_deref())
        .find_map(|ip| Ipv4Addr::from_str(ip).ok())
}

/// The rules wanted for a single service: one per port, or none if the service does not qualify
#[must_use]
pub fn service_rules(service: &Service, annotation: &str) -> Vec<PortForwardRule> {
    let meta = &service.metadata;
    let namespace = meta.namespace.as_deref().unwrap_or("default");
    let Some(name) = meta.name.as_deref() else {
        return vec![];
    };
    let Some(spec) = service.spec.as_ref() else {
        return vec![];
    };
    if spec.type_.as_deref() != Some(LOAD_BALANCER) {
        return vec![];
    }
    if !is_enabled(meta.annotations.as_ref(), annotation) {
        trace!("Service {namespace}/{name} did not opt in");
        return vec![];
    }
    let Some(dst_ip) = external_address(service) else {
        debug!("Service {namespace}/{name} has no external IPv4 address yet");
        return vec![];
    };

    let mut rules = vec![];
    for port in spec.ports.iter().flatten() {
        let Some(number) = u16::try_from(port.port).ok().and_then(NonZero::new) else {
            warn!("Service {namespace}/{name}: ignoring invalid port {}", port.port);
            continue;
        };
        // kubernetes defaults to TCP
        let protocol = port.protocol.as_deref().unwrap_or("TCP");
        let Ok(protocol) = Protocol::from_str(protocol) else {
            warn!("Service {namespace}/{name}: ignoring port {number} with protocol {protocol}");
            continue;
        };
        match RuleKey::new(namespace, name, number, protocol) {
            Ok(key) => rules.push(PortForwardRule::new(key, dst_ip, number)),
            Err(e) => warn!("Service {namespace}/{name} can't be forwarded: {e}"),
        }
    }
    rules
}

/// The rules wanted for all `services`
#[must_use]
pub fn desired_rules(services: &[Service], annotation: &str) -> Vec<PortForwardRule> {
    services
        .iter()
        .flat_map(|service| service_rules(service, annotation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServicePort, ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const ANNOTATION: &str = "routeros.autoport/enabled";

    fn port(number: i32, protocol: Option<&str>) -> ServicePort {
        ServicePort {
            port: number,
            protocol: protocol.map(str::to_string),
            ..Default::default()
        }
    }

    fn service(
        type_: &str,
        annotation: Option<&str>,
        ips: &[&str],
        ports: Vec<ServicePort>,
    ) -> Service {
        let annotations = annotation.map(|value| {
            BTreeMap::from([(ANNOTATION.to_string(), value.to_string())])
        });
        let ingress = ips
            .iter()
            .map(|ip| LoadBalancerIngress {
                ip: Some((*ip).to_string()),
                ..Default::default()
            })
            .collect();
        Service {
            metadata: ObjectMeta {
                name: Some("plex".to_string()),
                namespace: Some("media".to_string()),
                annotations,
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                ports: Some(ports),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(ingress),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    fn expected(port: u16, protocol: Protocol, ip: [u8; 4]) -> PortForwardRule {
        let port = NonZero::new(port).unwrap();
        let key = RuleKey::new("media", "plex", port, protocol).unwrap();
        PortForwardRule::new(key, Ipv4Addr::from(ip), port)
    }

    #[test]
    fn test_annotation_values() {
        let with = |value: &str| BTreeMap::from([(ANNOTATION.to_string(), value.to_string())]);
        assert!(is_enabled(Some(&with("true")), ANNOTATION));
        assert!(is_enabled(Some(&with(" true ")), ANNOTATION));
        assert!(is_enabled(Some(&with(" TRUE\n")), ANNOTATION));
        assert!(is_enabled(Some(&with("True")), ANNOTATION));
        assert!(!is_enabled(Some(&with("False")), ANNOTATION));
        assert!(!is_enabled(Some(&with("yes")), ANNOTATION));
        assert!(!is_enabled(Some(&with("")), ANNOTATION));
        assert!(!is_enabled(Some(&BTreeMap::new()), ANNOTATION));
        assert!(!is_enabled(None, ANNOTATION));
    }

    #[test]
    #[traced_test]
    fn test_opt_out() {
        let ports = || vec![port(80, None)];
        let ip = ["192.168.1.240"];
        for svc in [
            service("LoadBalancer", Some("False"), &ip, ports()),
            service("LoadBalancer", None, &ip, ports()),
            service("ClusterIP", Some("true"), &ip, ports()),
            service("NodePort", Some("true"), &ip, ports()),
            // no address assigned yet
            service("LoadBalancer", Some("true"), &[], ports()),
        ] {
            assert!(service_rules(&svc, ANNOTATION).is_empty());
        }
        assert!(logs_contain("has no external IPv4 address yet"));
    }

    #[test]
    fn test_multi_port_fan_out() {
        let svc = service(
            "LoadBalancer",
            Some("true"),
            &["192.168.1.240", "192.168.1.241"],
            vec![
                port(32400, Some("TCP")),
                port(1900, Some("UDP")),
                port(8324, None),
            ],
        );
        assert_eq!(
            service_rules(&svc, ANNOTATION),
            vec![
                expected(32400, Protocol::Tcp, [192, 168, 1, 240]),
                expected(1900, Protocol::Udp, [192, 168, 1, 240]),
                expected(8324, Protocol::Tcp, [192, 168, 1, 240]),
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_unusable_ports_and_addresses() {
        // IPv6 ingress first: the IPv4 one is used
        let svc = service(
            "LoadBalancer",
            Some("true"),
            &["fd00::10", "192.168.1.240"],
            vec![port(0, None), port(70000, None), port(80, Some("ICMP")), port(443, None)],
        );
        assert_eq!(
            service_rules(&svc, ANNOTATION),
            vec![expected(443, Protocol::Tcp, [192, 168, 1, 240])]
        );
        assert!(logs_contain("ignoring invalid port 70000"));

        let svc = service("LoadBalancer", Some("true"), &["fd00::10"], vec![port(80, None)]);
        assert!(service_rules(&svc, ANNOTATION).is_empty());
    }

    #[test]
    fn test_desired_rules() {
        let enabled = service(
            "LoadBalancer",
            Some("true"),
            &["192.168.1.240"],
            vec![port(80, None)],
        );
        let disabled = service("LoadBalancer", Some("false"), &["192.168.1.241"], vec![port(81, None)]);
        assert_eq!(
            desired_rules(&[enabled, disabled], ANNOTATION),
            vec![expected(80, Protocol::Tcp, [192, 168, 1, 240])]
        );
    }
}
