// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Api, Client, Config};
use portfw::PortForwardRule;
use rekon::{Classify, ErrorClass, Observe};
use std::path::Path;

#[allow(unused)]
use tracing::{debug, info, warn};

use crate::resolve::desired_rules;

/// Services are listed in pages of this size
const LIST_PAGE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),
    #[error("Failed to infer cluster configuration: {0}")]
    Infer(#[from] InferConfigError),
    #[error("Failed to build cluster client: {0}")]
    Client(kube::Error),
    #[error("Failed to list services: {0}")]
    List(kube::Error),
}

impl Classify for ClusterError {
    fn class(&self) -> ErrorClass {
        match self {
            ClusterError::Kubeconfig(_) | ClusterError::Infer(_) | ClusterError::Client(_) => {
                ErrorClass::Fatal
            }
            ClusterError::List(_) => ErrorClass::Retryable,
        }
    }
}

/// Build a client to the cluster. Credentials come from the kubeconfig file at `kubeconfig`
/// if given. Otherwise they are inferred: `KUBECONFIG`, the default kubeconfig file, then the
/// in-cluster service account.
///
/// # Errors
/// Fails if no usable configuration is found.
pub async fn cluster_client(kubeconfig: Option<&Path>) -> Result<Client, ClusterError> {
    // more than one provider may be compiled in
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        debug!("Crypto provider already installed: {e:?}");
    }

    let config = match kubeconfig {
        Some(path) => {
            debug!("Loading kubeconfig from {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    info!("Using cluster at {}", config.cluster_url);
    Client::try_from(config).map_err(ClusterError::Client)
}

/// Source of the desired port-forwarding rules: the services of the whole cluster which opted in
/// with an annotation
pub struct ServiceSource {
    api: Api<Service>,
    annotation: String,
}

impl ServiceSource {
    #[must_use]
    pub fn new(client: Client, annotation: &str) -> Self {
        Self {
            api: Api::all(client),
            annotation: annotation.to_string(),
        }
    }

    /// List the services of all namespaces
    ///
    /// # Errors
    /// Fails if the cluster can't be queried.
    pub async fn services(&self) -> Result<Vec<Service>, ClusterError> {
        let mut services = vec![];
        let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
        loop {
            let page = self.api.list(&params).await.map_err(ClusterError::List)?;
            services.extend(page.items);
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => params = params.continue_token(&token),
                _ => break,
            }
        }
        debug!("Listed {} services", services.len());
        Ok(services)
    }
}

impl Observe for ServiceSource {
    type Observation = Result<Vec<PortForwardRule>, ClusterError>;

    async fn observe(&self) -> Self::Observation {
        let services = self.services().await?;
        Ok(desired_rules(&services, &self.annotation))
    }
}
