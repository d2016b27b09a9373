use crate::apps::{ChangeSet, Container};
use crate::cluster::KubeCluster;
use crate::image::{ContainerIdentifier, ImageReference};
use crate::kinds::{Generated, InvalidImage, ResourceKind};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use kube::api::{ListParams, PostParams};
use kube::{Api, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

static KUBE_AUTODEPLOY_ANNOTATION: &str = "kube-autodeploy/updatedAt";
static KUBE_AUTODEPLOY_FIELD_MANAGER: &str = "kube-autodeploy";

/// A namespaced workload whose pod template can be read and rewritten.
pub trait Workload
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + k8s_openapi::Resource
        + Clone
        + Debug
        + Send
        + Sync
        + DeserializeOwned
        + Serialize
        + 'static,
{
    fn kind_name() -> &'static str {
        <Self as k8s_openapi::Resource>::KIND
    }
    fn pod_template(&self) -> Option<&PodTemplateSpec>;
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.pod_template().and_then(|t| t.spec.as_ref())
    }
}

impl Workload for Deployment {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|s| &mut s.template)
    }
}

impl Workload for StatefulSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|s| &mut s.template)
    }
}

impl Workload for DaemonSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|s| &mut s.template)
    }
}

//https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/cron-job-v1/#CronJobSpec
impl Workload for CronJob {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .map(|j| &j.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec
            .as_mut()
            .and_then(|s| s.job_template.spec.as_mut())
            .map(|j| &mut j.template)
    }
}

/// Points the named container of `workload` at `image` and stamps the pod template
/// with the update time. Returns the previous image.
pub fn set_container_image<W: Workload>(
    workload: &mut W,
    container: &str,
    image: &str,
) -> anyhow::Result<Option<String>> {
    let name = workload.meta().name.clone().unwrap_or_default();
    let template = workload
        .pod_template_mut()
        .with_context(|| format!("{} {} has no pod template", W::kind_name(), name))?;

    let previous = {
        let slot = template
            .spec
            .as_mut()
            .and_then(|spec| spec.containers.iter_mut().find(|c| c.name == container))
            .with_context(|| {
                format!("{} {} has no container {}", W::kind_name(), name, container)
            })?;
        slot.image.replace(image.to_string())
    };

    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            KUBE_AUTODEPLOY_ANNOTATION.to_string(),
            Utc::now().to_rfc3339(),
        );

    Ok(previous)
}

/// Kubernetes workload kind backed by the typed API of `W`.
pub struct KubeKind<W> {
    app_label: String,
    _workload: PhantomData<fn() -> W>,
}

impl<W: Workload> KubeKind<W> {
    pub fn new(app_label: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            _workload: PhantomData,
        }
    }
}

#[async_trait]
impl<W: Workload> ResourceKind<KubeCluster> for KubeKind<W> {
    type Item = W;

    fn kind(&self) -> &str {
        W::kind_name()
    }

    async fn fetch(&self, cluster: &KubeCluster, namespace: &str) -> anyhow::Result<Vec<W>> {
        let api: Api<W> = Api::namespaced(cluster.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list {} in namespace {}", W::kind_name(), namespace))?;
        Ok(list.items)
    }

    fn generate(&self, item: &W) -> Vec<Generated> {
        let Some(name) = item.meta().name.as_deref() else {
            return Vec::new();
        };
        let app = item
            .meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.app_label))
            .cloned()
            .unwrap_or_default();

        item.pod_spec()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|c| {
                let container_id = ContainerIdentifier::new(name, &c.name);
                let image = c.image.clone().unwrap_or_default();
                match ImageReference::parse(&image) {
                    Ok(reference) => Ok(Container {
                        app: app.clone(),
                        container_id,
                        image_id: reference.identifier(),
                        current: reference.tag,
                    }),
                    Err(source) => Err(InvalidImage {
                        container_id,
                        image,
                        source,
                    }),
                }
            })
            .collect()
    }

    async fn upgrade(
        &self,
        cluster: &KubeCluster,
        namespace: &str,
        change_set: &ChangeSet,
        container: &Container,
    ) -> anyhow::Result<()> {
        let api: Api<W> = Api::namespaced(cluster.client.clone(), namespace);
        let id = &container.container_id;
        let target = change_set.registry_path();

        let mut item = api
            .get(&id.resource)
            .await
            .with_context(|| format!("Failed to get {} {}", W::kind_name(), id.resource))?;

        let previous = set_container_image(&mut item, &id.container, &target)?;
        debug!(
            "{} {} image {} -> {}",
            W::kind_name(),
            id,
            previous.as_deref().unwrap_or("<none>"),
            target
        );

        // replace carries the fetched resourceVersion, so a concurrent change is rejected
        let params = PostParams {
            field_manager: Some(KUBE_AUTODEPLOY_FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.replace(&id.resource, &params, &item)
            .await
            .with_context(|| format!("Failed to update {} {}", W::kind_name(), id.resource))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageIdentifier;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn deployment() -> Deployment {
        serde_json::from_value(json!({
            "metadata": { "name": "web", "labels": { "app": "shop" } },
            "spec": {
                "selector": { "matchLabels": { "app": "shop" } },
                "template": {
                    "spec": {
                        "containers": [
                            { "name": "web", "image": "12345.dkr.ecr/foo:1.0.0" },
                            { "name": "proxy", "image": "envoy@sha256:0123" }
                        ]
                    }
                }
            }
        }))
        .unwrap()
    }

    fn cronjob() -> CronJob {
        serde_json::from_value(json!({
            "metadata": { "name": "cleanup" },
            "spec": {
                "schedule": "0 * * * *",
                "jobTemplate": {
                    "spec": {
                        "template": {
                            "spec": {
                                "containers": [
                                    { "name": "cleanup", "image": "12345.dkr.ecr/foo" }
                                ]
                            }
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Deployment::kind_name(), "Deployment");
        assert_eq!(StatefulSet::kind_name(), "StatefulSet");
        assert_eq!(DaemonSet::kind_name(), "DaemonSet");
        assert_eq!(CronJob::kind_name(), "CronJob");
    }

    #[test]
    fn test_generate_deployment_containers() {
        let kind = KubeKind::<Deployment>::new("app");
        let generated = kind.generate(&deployment());
        assert_eq!(generated.len(), 2);

        let web = generated[0].as_ref().unwrap();
        assert_eq!(web.app, "shop");
        assert_eq!(web.container_id, ContainerIdentifier::new("web", "web"));
        assert_eq!(web.image_id, ImageIdentifier::new("12345.dkr.ecr", "foo"));
        assert_eq!(web.current, "1.0.0");

        let proxy = generated[1].as_ref().unwrap_err();
        assert_eq!(proxy.container_id.container, "proxy");
    }

    #[test]
    fn test_generate_cronjob_without_label() {
        let kind = KubeKind::<CronJob>::new("app");
        let generated = kind.generate(&cronjob());
        assert_eq!(generated.len(), 1);
        let cleanup = generated[0].as_ref().unwrap();
        assert_eq!(cleanup.app, "");
        assert_eq!(cleanup.current, "latest");
    }

    #[test]
    fn test_generate_uses_configured_label() {
        let kind = KubeKind::<Deployment>::new("app.kubernetes.io/name");
        let generated = kind.generate(&deployment());
        assert_eq!(generated[0].as_ref().unwrap().app, "");
    }

    #[test]
    fn test_generate_item_without_spec() {
        let deployment: Deployment =
            serde_json::from_value(json!({ "metadata": { "name": "empty" } })).unwrap();
        assert!(KubeKind::<Deployment>::new("app").generate(&deployment).is_empty());
    }

    #[test]
    fn test_set_container_image() {
        let mut deployment = deployment();
        let previous = set_container_image(&mut deployment, "web", "12345.dkr.ecr/foo:2.0.0").unwrap();
        assert_eq!(previous.as_deref(), Some("12345.dkr.ecr/foo:1.0.0"));

        let template = deployment.pod_template().unwrap();
        let containers = &template.spec.as_ref().unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some("12345.dkr.ecr/foo:2.0.0"));
        assert_eq!(containers[1].image.as_deref(), Some("envoy@sha256:0123"));
        assert!(
            template
                .metadata
                .as_ref()
                .and_then(|m| m.annotations.as_ref())
                .is_some_and(|a| a.contains_key(KUBE_AUTODEPLOY_ANNOTATION))
        );
    }

    #[test]
    fn test_set_container_image_cronjob() {
        let mut cronjob = cronjob();
        set_container_image(&mut cronjob, "cleanup", "12345.dkr.ecr/foo:2.0.0").unwrap();
        let image = cronjob.pod_spec().unwrap().containers[0].image.clone();
        assert_eq!(image.as_deref(), Some("12345.dkr.ecr/foo:2.0.0"));
    }

    #[test]
    fn test_set_container_image_unknown_container() {
        let mut deployment = deployment();
        let err = set_container_image(&mut deployment, "missing", "reg/foo:2").unwrap_err();
        assert_eq!(err.to_string(), "Deployment web has no container missing");
    }

    /// In-memory API server holding one Deployment and recording every write.
    #[derive(Default)]
    struct FakeApiServer {
        stored: Mutex<Value>,
        gets: AtomicUsize,
        puts: Mutex<Vec<Value>>,
        conflict: bool,
    }

    async fn get_deployment(
        State(api): State<Arc<FakeApiServer>>,
    ) -> Json<Value> {
        api.gets.fetch_add(1, Ordering::SeqCst);
        Json(api.stored.lock().unwrap().clone())
    }

    async fn put_deployment(
        State(api): State<Arc<FakeApiServer>>,
        Json(body): Json<Value>,
    ) -> Response {
        api.puts.lock().unwrap().push(body.clone());
        if api.conflict {
            let status = json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "the object has been modified",
                "reason": "Conflict",
                "code": 409
            });
            return (StatusCode::CONFLICT, Json(status)).into_response();
        }
        *api.stored.lock().unwrap() = body.clone();
        Json(body).into_response()
    }

    async fn serve(conflict: bool) -> (Arc<FakeApiServer>, KubeCluster) {
        let mut stored = serde_json::to_value(deployment()).unwrap();
        stored["apiVersion"] = json!("apps/v1");
        stored["kind"] = json!("Deployment");
        stored["metadata"]["namespace"] = json!("default");
        stored["metadata"]["resourceVersion"] = json!("7");

        let api = Arc::new(FakeApiServer {
            stored: Mutex::new(stored),
            conflict,
            ..Default::default()
        });
        let app = Router::new()
            .route(
                "/apis/apps/v1/namespaces/default/deployments/{name}",
                get(get_deployment).put(put_deployment),
            )
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = kube::Config::new(format!("http://{}", addr).parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        (api, KubeCluster { client })
    }

    fn web_change_set() -> (ChangeSet, Container) {
        let image_id = ImageIdentifier::new("12345.dkr.ecr", "foo");
        let container = Container {
            app: "shop".to_string(),
            container_id: ContainerIdentifier::new("web", "web"),
            image_id: image_id.clone(),
            current: "1.0.0".to_string(),
        };
        let mut change_set = ChangeSet::new(image_id);
        change_set.add_container("Deployment", container.clone());
        change_set.set_latest("2.0.0");
        (change_set, container)
    }

    #[tokio::test]
    async fn test_upgrade_replaces_workload_once() {
        let (api, cluster) = serve(false).await;
        let (change_set, container) = web_change_set();

        KubeKind::<Deployment>::new("app")
            .upgrade(&cluster, "default", &change_set, &container)
            .await
            .unwrap();

        assert_eq!(api.gets.load(Ordering::SeqCst), 1);
        let puts = api.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let written = &puts[0];
        assert_eq!(written["metadata"]["resourceVersion"], "7");
        let template = &written["spec"]["template"];
        assert_eq!(
            template["spec"]["containers"][0]["image"],
            "12345.dkr.ecr/foo:2.0.0"
        );
        assert_eq!(template["spec"]["containers"][1]["image"], "envoy@sha256:0123");
        assert!(template["metadata"]["annotations"][KUBE_AUTODEPLOY_ANNOTATION].is_string());
    }

    #[tokio::test]
    async fn test_upgrade_write_conflict_is_an_error() {
        let (api, cluster) = serve(true).await;
        let (change_set, container) = web_change_set();

        let err = KubeKind::<Deployment>::new("app")
            .upgrade(&cluster, "default", &change_set, &container)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to update Deployment web");
        assert_eq!(api.puts.lock().unwrap().len(), 1);
    }
}
