// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

use args::{CmdArgs, Parser};
use mgmt::{MgmtParams, ReconcilerParams, start_mgmt};
use tokio_util::sync::CancellationToken;
use tracectl::{get_trace_ctl, trace_target};

use tracing::{error, info, level_filters::LevelFilter};

trace_target!("autoport", LevelFilter::INFO, &[]);

fn init_logging() {
    let tctl = get_trace_ctl();
    if let Err(e) = tctl.set_default_level(LevelFilter::INFO) {
        eprintln!("Setting default loglevel failed: {e}");
    }
    info!(" ━━━━━━ routeros-autoport {} started ━━━━━━", env!("CARGO_PKG_VERSION"));
}

fn process_tracing_cmds(args: &CmdArgs) {
    if let Some(tracing) = args.tracing()
        && let Err(e) = get_trace_ctl().setup_from_string(tracing)
    {
        error!("Invalid tracing configuration: {e}");
        std::process::exit(2);
    }
    if args.show_tracing_tags() {
        let out = get_trace_ctl()
            .as_string_by_tag()
            .unwrap_or_else(|e| e.to_string());
        println!("{out}");
        std::process::exit(0);
    }
    if args.show_tracing_targets() {
        let out = get_trace_ctl()
            .as_string()
            .unwrap_or_else(|e| e.to_string());
        println!("{out}");
        std::process::exit(0);
    }
}

fn mgmt_params(args: &CmdArgs) -> Option<MgmtParams> {
    Some(MgmtParams {
        router: args.router_config()?,
        in_interface_list: args.in_interface_list().to_string(),
        kubeconfig: args.kubeconfig().map(ToOwned::to_owned),
        annotation: args.annotation().to_string(),
        reconcile: ReconcilerParams {
            interval: args.interval(),
            max_backoff: args.max_backoff(),
        },
    })
}

fn main() {
    let args = CmdArgs::parse();
    init_logging();
    process_tracing_cmds(&args);

    let Some(params) = mgmt_params(&args) else {
        error!("Router address and user are required");
        std::process::exit(2);
    };
    info!(
        "Forwarding ports of annotated services through router {}",
        params.router.address
    );

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Termination requested");
        ctrlc_cancel.cancel();
    }) {
        error!("Failed to set signal handler: {e}");
        std::process::exit(1);
    }

    let handle = match start_mgmt(params, cancel) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start management: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = match handle.join() {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!("Management failed: {e}");
            1
        }
        Err(_) => {
            error!("Management thread panicked");
            1
        }
    };
    info!("Shutting down routeros-autoport");
    std::process::exit(exit_code);
}
