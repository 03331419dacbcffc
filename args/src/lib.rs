// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command line arguments

pub use clap::Parser;
use routeros::{RouterAddress, RouterConfig};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ANNOTATION: &str = "routeros.autoport/enabled";
pub const DEFAULT_IN_INTERFACE_LIST: &str = "WAN";
pub const PASSWORD_ENV: &str = "ROUTEROS_PASSWORD";

#[derive(Parser)]
#[command(name = "routeros-autoport")]
#[command(version)]
#[command(
    about = "Keeps the port-forwarding rules of a RouterOS router in sync with the load-balancer services of a k8s cluster",
    long_about = None
)]
pub struct CmdArgs {
    #[arg(
        long,
        value_name = "HOST[:PORT]",
        value_parser = RouterAddress::from_str,
        required_unless_present_any = ["show_tracing_tags", "show_tracing_targets"],
        help = "Address of the router API service. The port defaults to 8728"
    )]
    router_address: Option<RouterAddress>,

    #[arg(
        long,
        value_name = "USER",
        required_unless_present_any = ["show_tracing_tags", "show_tracing_targets"],
        help = "User to log in to the router as"
    )]
    router_user: Option<String>,

    #[arg(
        long,
        value_name = "PASSWORD",
        env = PASSWORD_ENV,
        hide_env_values = true,
        default_value = "",
        help = "Password of the router user"
    )]
    router_password: String,

    #[arg(
        long,
        value_name = "PATH",
        help = "Kubeconfig file of the cluster. If not given, KUBECONFIG, ~/.kube/config or the in-cluster configuration is used"
    )]
    kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Time between reconciliation cycles"
    )]
    interval: u64,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Longest time between reconciliation cycles while they fail"
    )]
    max_backoff: u64,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Timeout for connecting to the router and for each command sent to it"
    )]
    command_timeout: u64,

    #[arg(
        long,
        value_name = "ANNOTATION",
        default_value = DEFAULT_ANNOTATION,
        help = "Annotation through which load-balancer services opt in. Its value must be 'true'"
    )]
    annotation: String,

    #[arg(
        long,
        value_name = "LIST",
        default_value = DEFAULT_IN_INTERFACE_LIST,
        help = "Interface list whose incoming traffic is forwarded by the rules created"
    )]
    in_interface_list: String,

    #[arg(
        long,
        default_value_t = false,
        help = "Show the available tracing tags and exit"
    )]
    show_tracing_tags: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Show configurable tracing targets and exit"
    )]
    show_tracing_targets: bool,

    #[arg(
        long,
        value_name = "tracing configuration",
        help = "Tracing config string as comma-separated sequence of tag=level, with level one in [off,error,warn,info,debug,trace].
Passing default=level sets the default log-level.
Passing all=level allows setting the log-level of all targets to level.
E.g. default=error,all=info,router=debug will set the default target to error, and all the registered targets to info, but enable debug for the router"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    pub fn show_tracing_tags(&self) -> bool {
        self.show_tracing_tags
    }
    pub fn show_tracing_targets(&self) -> bool {
        self.show_tracing_targets
    }
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }

    pub fn router_address(&self) -> Option<&RouterAddress> {
        self.router_address.as_ref()
    }

    /// Parameters to connect to the router. These are always present unless only
    /// tracing information was requested.
    pub fn router_config(&self) -> Option<RouterConfig> {
        Some(RouterConfig {
            address: self.router_address.clone()?,
            username: self.router_user.clone()?,
            password: self.router_password.clone(),
            timeout: self.command_timeout(),
        })
    }

    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn in_interface_list(&self) -> &str {
        &self.in_interface_list
    }
}
