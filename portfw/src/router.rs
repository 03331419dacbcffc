// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port-forwarding rules as NAT rules of the router

use rekon::{AsRequirement, Create, Observe, Remove};
use routeros::{Attributes, Client, Command, RouterError};
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::num::NonZero;
use std::str::FromStr;

use crate::comment::{COMMENT_PREFIX, IdentityError, decode_comment};
use crate::rule::{PortForwardRule, Protocol, RuleKey};

#[allow(unused)]
use tracing::{debug, info, trace, warn};

const NAT_PRINT: &str = "/ip/firewall/nat/print";
const NAT_ADD: &str = "/ip/firewall/nat/add";
const NAT_REMOVE: &str = "/ip/firewall/nat/remove";

/// Properties fetched for every NAT rule
const NAT_PROPERTIES: [&str; 6] = [
    ".id",
    "comment",
    "dst-port",
    "protocol",
    "to-addresses",
    "to-ports",
];

/// A port-forwarding rule found on the router, along with the router's identifier for it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObservedRule {
    id: String,
    rule: PortForwardRule,
}

impl ObservedRule {
    #[must_use]
    pub fn new(id: &str, rule: PortForwardRule) -> Self {
        Self {
            id: id.to_string(),
            rule,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn rule(&self) -> &PortForwardRule {
        &self.rule
    }
}

impl Display for ObservedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (id {})", self.rule, self.id)
    }
}

impl AsRequirement<PortForwardRule> for ObservedRule {
    fn as_requirement(&self) -> PortForwardRule {
        self.rule.clone()
    }
}

/// Reasons why a NAT rule can't be taken as one of ours
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObservationError {
    #[error("Missing property '{0}'")]
    Missing(&'static str),
    #[error("Unsupported value '{value}' for property '{property}'")]
    Unsupported {
        property: &'static str,
        value: String,
    },
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

fn property<'a>(
    attrs: &'a Attributes,
    property: &'static str,
) -> Result<&'a str, ObservationError> {
    attrs
        .get(property)
        .map(String::as_str)
        .ok_or(ObservationError::Missing(property))
}

fn parse_property<T: FromStr>(
    attrs: &Attributes,
    property_name: &'static str,
) -> Result<T, ObservationError> {
    let value = property(attrs, property_name)?;
    value.parse().map_err(|_| ObservationError::Unsupported {
        property: property_name,
        value: value.to_string(),
    })
}

impl TryFrom<&Attributes> for ObservedRule {
    type Error = ObservationError;

    /// Build an [`ObservedRule`] from the properties of a NAT rule. Port ranges or lists, and
    /// address ranges, can't be expressed by a [`PortForwardRule`] and are refused.
    fn try_from(attrs: &Attributes) -> Result<Self, Self::Error> {
        let id = property(attrs, ".id")?;
        let (namespace, name) = decode_comment(property(attrs, "comment")?)?;
        let dst_port: NonZero<u16> = parse_property(attrs, "dst-port")?;
        let protocol: Protocol = parse_property(attrs, "protocol")?;
        let dst_ip: Ipv4Addr = parse_property(attrs, "to-addresses")?;
        // the router leaves the port unchanged if to-ports is unset
        let to_port = match attrs.get("to-ports") {
            Some(_) => parse_property(attrs, "to-ports")?,
            None => dst_port,
        };
        let key = RuleKey::new(namespace, name, dst_port, protocol)?;
        Ok(ObservedRule::new(id, PortForwardRule::new(key, dst_ip, to_port)))
    }
}

/// Terminates the sessions a manager holds
#[allow(async_fn_in_trait)]
pub trait Shutdown {
    async fn shutdown(&self);
}

/// Manages the port-forwarding rules of a router as NAT rules in its `dstnat` chain
pub struct NatManager {
    client: Client,
    in_interface_list: String,
}

impl NatManager {
    /// Create a manager which creates rules matching traffic from interfaces in `in_interface_list`
    #[must_use]
    pub fn new(client: Client, in_interface_list: &str) -> Self {
        Self {
            client,
            in_interface_list: in_interface_list.to_string(),
        }
    }

    /// The router offers no prefix match on comments. Rules whose comment sorts after the
    /// prefix are fetched and the ones not carrying it are dropped afterwards.
    fn print_command() -> Command {
        Command::new(NAT_PRINT)
            .proplist(&NAT_PROPERTIES)
            .query_greater("comment", COMMENT_PREFIX)
    }

    fn add_command(&self, rule: &PortForwardRule) -> Command {
        let key = rule.key();
        Command::new(NAT_ADD)
            .attribute("chain", "dstnat")
            .attribute("action", "dst-nat")
            .attribute("dst-port", key.dst_port())
            .attribute("protocol", key.protocol())
            .attribute("to-addresses", rule.dst_ip())
            .attribute("to-ports", rule.to_port())
            .attribute("comment", key.comment())
            .attribute("in-interface-list", &self.in_interface_list)
    }

    fn remove_command(observed: &ObservedRule) -> Command {
        Command::new(NAT_REMOVE).attribute(".id", observed.id())
    }

    /// List the port-forwarding rules of ours. Any other NAT rule is skipped.
    ///
    /// # Errors
    /// Fails if the router can't be queried.
    pub async fn list(&self) -> Result<Vec<ObservedRule>, RouterError> {
        let items = self.client.run(&Self::print_command()).await?;
        let rules = items
            .iter()
            .filter(|attrs| {
                attrs
                    .get("comment")
                    .is_some_and(|comment| comment.starts_with(COMMENT_PREFIX))
            })
            .filter_map(|attrs| match ObservedRule::try_from(attrs) {
                Ok(observed) => Some(observed),
                Err(e) => {
                    let id = attrs.get(".id").map_or("?", String::as_str);
                    debug!("Skipping NAT rule {id}: {e}");
                    None
                }
            })
            .collect();
        Ok(rules)
    }
}

impl Observe for NatManager {
    type Observation = Result<Vec<ObservedRule>, RouterError>;

    async fn observe(&self) -> Self::Observation {
        self.list().await
    }
}

impl Create for NatManager {
    type Requirement = PortForwardRule;
    type Outcome = Result<(), RouterError>;

    async fn create(&self, requirement: &Self::Requirement) -> Self::Outcome {
        self.client.run(&self.add_command(requirement)).await?;
        Ok(())
    }
}

impl Remove for NatManager {
    type Observation = ObservedRule;
    type Outcome = Result<(), RouterError>;

    async fn remove(&self, observation: &Self::Observation) -> Self::Outcome {
        self.client.run(&Self::remove_command(observation)).await?;
        Ok(())
    }
}

impl Shutdown for NatManager {
    async fn shutdown(&self) {
        self.client.close().await;
    }
}
