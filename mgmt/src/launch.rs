// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Launch of the reconciliation thread

use k8s_intf::{ClusterError, ServiceSource, cluster_client};
use portfw::NatManager;
use rekon::Classify;
use routeros::{Client, RouterConfig, RouterError};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::reconcile::{Reconciler, ReconcilerParams};

#[allow(unused)]
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Cluster client error: {0}")]
    ClusterError(ClusterError),
    #[error("Router error: {0}")]
    RouterError(RouterError),
}

pub struct MgmtParams {
    pub router: RouterConfig,
    /// interface list the created rules match incoming traffic on
    pub in_interface_list: String,
    pub kubeconfig: Option<PathBuf>,
    /// annotation through which services opt in
    pub annotation: String,
    pub reconcile: ReconcilerParams,
}

/// Connect to the router. An unreachable router is not an error at this point: the
/// connection is retried with every cycle. Invalid credentials are.
async fn router_client(config: RouterConfig) -> Result<Client, RouterError> {
    match Client::connect(config.clone()).await {
        Ok(client) => Ok(client),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Router not reachable yet: {e}");
            Ok(Client::new(config))
        }
    }
}

async fn reconcile(params: MgmtParams, cancel: CancellationToken) -> Result<(), LaunchError> {
    let cluster = cluster_client(params.kubeconfig.as_deref())
        .await
        .inspect_err(|e| error!("Failed to create cluster client: {e}"))
        .map_err(LaunchError::ClusterError)?;
    let router = router_client(params.router)
        .await
        .inspect_err(|e| error!("Failed to log in to router: {e}"))
        .map_err(LaunchError::RouterError)?;

    let source = ServiceSource::new(cluster, &params.annotation);
    let nat = NatManager::new(router, &params.in_interface_list);
    Reconciler::new(source, nat, &params.reconcile)
        .run(cancel)
        .await;
    Ok(())
}

/// Start the reconciliation thread. It runs until `cancel` fires, or fails right away if
/// either the cluster or the router can't be used.
pub fn start_mgmt(
    params: MgmtParams,
    cancel: CancellationToken,
) -> Result<std::thread::JoinHandle<Result<(), LaunchError>>, std::io::Error> {
    std::thread::Builder::new()
        .name("mgmt".to_string())
        .spawn(move || {
            debug!("Starting reconciliation thread");

            /* create tokio runtime */
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()?;

            rt.block_on(reconcile(params, cancel))
        })
}
