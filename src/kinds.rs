//! Workload kinds the engine knows how to scan and upgrade.
//!
//! A kind is implemented once against its own item type through [`ResourceKind`]. The
//! [`KindRegistry`] stores kinds behind the object-safe [`RegisteredKind`] so the items a
//! kind fetches are only ever handed to that same kind's generator.

use crate::apps::{ChangeSet, Container};
use crate::image::{ContainerIdentifier, ImageParseError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A container whose image could not be turned into a [`Container`].
#[derive(Debug, Error)]
#[error("container {container_id} has unparsable image {image}: {source}")]
pub struct InvalidImage {
    pub container_id: ContainerIdentifier,
    pub image: String,
    #[source]
    pub source: ImageParseError,
}

pub type Generated = Result<Container, InvalidImage>;

#[async_trait]
pub trait ResourceKind<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    type Item: Send + Sync;

    /// Name of the kind, used as key in change sets.
    fn kind(&self) -> &str;

    /// Lists every item of this kind in `namespace`.
    async fn fetch(&self, cluster: &C, namespace: &str) -> anyhow::Result<Vec<Self::Item>>;

    /// Describes the containers of one item. Must not fail as a whole: items without
    /// containers yield nothing and unparsable images are reported per container.
    fn generate(&self, item: &Self::Item) -> Vec<Generated>;

    /// Points `container` at the change set's registry path and persists the item.
    async fn upgrade(
        &self,
        cluster: &C,
        namespace: &str,
        change_set: &ChangeSet,
        container: &Container,
    ) -> anyhow::Result<()>;
}

/// Type-erased view of a [`ResourceKind`].
#[async_trait]
pub trait RegisteredKind<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    fn kind_name(&self) -> &str;

    /// Fetches all items and runs the generator over each of them.
    async fn discover(&self, cluster: &C, namespace: &str) -> anyhow::Result<Vec<Generated>>;

    async fn upgrade_container(
        &self,
        cluster: &C,
        namespace: &str,
        change_set: &ChangeSet,
        container: &Container,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<C, K> RegisteredKind<C> for K
where
    C: Send + Sync + 'static,
    K: ResourceKind<C>,
{
    fn kind_name(&self) -> &str {
        self.kind()
    }

    async fn discover(&self, cluster: &C, namespace: &str) -> anyhow::Result<Vec<Generated>> {
        let items = self.fetch(cluster, namespace).await?;
        Ok(items.iter().flat_map(|item| self.generate(item)).collect())
    }

    async fn upgrade_container(
        &self,
        cluster: &C,
        namespace: &str,
        change_set: &ChangeSet,
        container: &Container,
    ) -> anyhow::Result<()> {
        self.upgrade(cluster, namespace, change_set, container)
            .await
    }
}

/// Caller-owned table of kinds. Registering a kind twice replaces the first one.
pub struct KindRegistry<C> {
    kinds: BTreeMap<String, Arc<dyn RegisteredKind<C>>>,
}

impl<C> KindRegistry<C>
where
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    pub fn register<K>(&mut self, kind: K) -> &mut Self
    where
        K: ResourceKind<C> + 'static,
    {
        self.kinds.insert(kind.kind().to_string(), Arc::new(kind));
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn RegisteredKind<C>>> {
        self.kinds.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Arc<dyn RegisteredKind<C>>> {
        self.kinds.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }
}

impl<C> Default for KindRegistry<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
