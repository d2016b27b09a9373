use crate::kinds::KindRegistry;
use crate::workload::KubeKind;
use anyhow::Context;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use kube::Client;
use kube::config::Kubeconfig;
use tracing::info;

/// Handle on the Kubernetes API server handed to every workload kind.
#[derive(Clone)]
pub struct KubeCluster {
    pub client: Client,
}

pub async fn create_client() -> anyhow::Result<KubeCluster> {
    info!("Initializing K8s client");
    // honours KUBECONFIG, then ~/.kube/config, then the in-cluster service account
    let client = Client::try_default()
        .await
        .context("Failed to load Kubernetes configuration")?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(KubeCluster { client })
}

/// Name of the current context in the local kubeconfig.
pub fn current_context() -> anyhow::Result<String> {
    let kubeconfig = Kubeconfig::read().context("Failed to read kubeconfig")?;
    kubeconfig
        .current_context
        .filter(|context| !context.is_empty())
        .context("Unable to read kubectl context")
}

/// Registry with every workload kind supported on a real cluster.
pub fn default_kinds(app_label: &str) -> KindRegistry<KubeCluster> {
    let mut kinds = KindRegistry::new();
    kinds
        .register(KubeKind::<Deployment>::new(app_label))
        .register(KubeKind::<StatefulSet>::new(app_label))
        .register(KubeKind::<DaemonSet>::new(app_label))
        .register(KubeKind::<CronJob>::new(app_label));
    kinds
}
