// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port-forwarding rule objects

use std::fmt::Display;
use std::net::Ipv4Addr;
use std::num::NonZero;

use crate::comment::{IdentityError, encode_comment, validate_identity};

/// Transport protocols a rule can forward. Names are the lower-case ones the router uses.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

/// The identity of a [`PortForwardRule`]. At most one rule exists per key, both in the desired
/// state and in the router.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RuleKey {
    namespace: String,
    name: String,
    dst_port: NonZero<u16>,
    protocol: Protocol,
}

impl RuleKey {
    /// Build a key for the service `namespace`/`name`
    ///
    /// # Errors
    /// Fails if the pair can't be carried in a rule comment.
    pub fn new(
        namespace: &str,
        name: &str,
        dst_port: NonZero<u16>,
        protocol: Protocol,
    ) -> Result<Self, IdentityError> {
        validate_identity(namespace, name)?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            dst_port,
            protocol,
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dst_port(&self) -> NonZero<u16> {
        self.dst_port
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The comment identifying the rules of this key's service on the router
    #[must_use]
    pub fn comment(&self) -> String {
        encode_comment(&self.namespace, &self.name)
    }
}

impl Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {}/{}",
            self.namespace, self.name, self.protocol, self.dst_port
        )
    }
}

/// A NAT port-forwarding rule: traffic reaching the router on `dst_port` is forwarded
/// to `dst_ip`:`to_port`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PortForwardRule {
    key: RuleKey,
    dst_ip: Ipv4Addr,
    to_port: NonZero<u16>,
}

impl PortForwardRule {
    #[must_use]
    pub fn new(key: RuleKey, dst_ip: Ipv4Addr, to_port: NonZero<u16>) -> Self {
        Self {
            key,
            dst_ip,
            to_port,
        }
    }

    #[must_use]
    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    #[must_use]
    pub fn dst_ip(&self) -> Ipv4Addr {
        self.dst_ip
    }

    #[must_use]
    pub fn to_port(&self) -> NonZero<u16> {
        self.to_port
    }

    /// Tell if `other` forwards the same key to the same address.
    /// The forwarded port is not considered.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.key == other.key && self.dst_ip == other.dst_ip
    }
}

impl Display for PortForwardRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}:{}", self.key, self.dst_ip, self.to_port)
    }
}
