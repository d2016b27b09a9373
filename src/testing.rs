//! In-memory cluster used by engine tests.

use crate::apps::{ChangeSet, Container};
use crate::image::{ContainerIdentifier, ImageReference};
use crate::kinds::{Generated, InvalidImage, ResourceKind};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeWorkload {
    pub kind: String,
    pub name: String,
    pub app: String,
    /// (container name, image)
    pub containers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCall {
    pub kind: String,
    pub resource: String,
    pub container: String,
    pub image: String,
}

#[derive(Default)]
pub struct FakeCluster {
    workloads: Mutex<Vec<FakeWorkload>>,
    failing_fetch: Option<String>,
    rejected_writes: Vec<String>,
    calls: Mutex<Vec<UpgradeCall>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(self, kind: &str, name: &str, app: &str, containers: &[(&str, &str)]) -> Self {
        self.workloads.lock().unwrap().push(FakeWorkload {
            kind: kind.to_string(),
            name: name.to_string(),
            app: app.to_string(),
            containers: containers
                .iter()
                .map(|(n, i)| (n.to_string(), i.to_string()))
                .collect(),
        });
        self
    }

    /// Makes every fetch of `kind` fail.
    pub fn failing_fetch(mut self, kind: &str) -> Self {
        self.failing_fetch = Some(kind.to_string());
        self
    }

    /// Makes writes to the named resource fail.
    pub fn rejecting_writes_to(mut self, resource: &str) -> Self {
        self.rejected_writes.push(resource.to_string());
        self
    }

    pub fn calls(&self) -> Vec<UpgradeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn image_of(&self, kind: &str, resource: &str, container: &str) -> Option<String> {
        self.workloads
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.kind == kind && w.name == resource)
            .and_then(|w| w.containers.iter().find(|(n, _)| n == container))
            .map(|(_, image)| image.clone())
    }
}

pub struct FakeKind {
    kind: String,
}

impl FakeKind {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }
}

#[async_trait]
impl ResourceKind<FakeCluster> for FakeKind {
    type Item = FakeWorkload;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn fetch(&self, cluster: &FakeCluster, _namespace: &str) -> anyhow::Result<Vec<FakeWorkload>> {
        if cluster.failing_fetch.as_deref() == Some(self.kind.as_str()) {
            anyhow::bail!("connection refused");
        }
        Ok(cluster
            .workloads
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.kind == self.kind)
            .cloned()
            .collect())
    }

    fn generate(&self, item: &FakeWorkload) -> Vec<Generated> {
        item.containers
            .iter()
            .map(|(name, image)| {
                let container_id = ContainerIdentifier::new(&item.name, name);
                match ImageReference::parse(image) {
                    Ok(reference) => Ok(Container {
                        app: item.app.clone(),
                        container_id,
                        image_id: reference.identifier(),
                        current: reference.tag,
                    }),
                    Err(source) => Err(InvalidImage {
                        container_id,
                        image: image.clone(),
                        source,
                    }),
                }
            })
            .collect()
    }

    async fn upgrade(
        &self,
        cluster: &FakeCluster,
        _namespace: &str,
        change_set: &ChangeSet,
        container: &Container,
    ) -> anyhow::Result<()> {
        let id = &container.container_id;
        let mut workloads = cluster.workloads.lock().unwrap();
        let workload = workloads
            .iter_mut()
            .find(|w| w.kind == self.kind && w.name == id.resource)
            .with_context(|| format!("{} {} not found", self.kind, id.resource))?;
        let slot = workload
            .containers
            .iter_mut()
            .find(|(name, _)| *name == id.container)
            .with_context(|| format!("container {} not found", id))?;

        cluster.calls.lock().unwrap().push(UpgradeCall {
            kind: self.kind.clone(),
            resource: id.resource.clone(),
            container: id.container.clone(),
            image: change_set.registry_path(),
        });
        if cluster.rejected_writes.contains(&id.resource) {
            anyhow::bail!("the object has been modified; please apply your changes to the latest version");
        }
        slot.1 = change_set.registry_path();
        Ok(())
    }
}
