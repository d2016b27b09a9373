use crate::apps::{self, ChangeSet, LatestTags, Snapshot, UnlabelledPolicy};
use crate::image::ImageIdentifier;
use crate::kinds::KindRegistry;
use crate::scanner::{self, ScanError};
use crate::upgrade::{self, UpgradeReport};
use std::sync::Arc;

/// Finds and upgrades the applications of one namespace.
pub struct AppManager<C> {
    cluster: C,
    namespace: String,
    kinds: Arc<KindRegistry<C>>,
    policy: UnlabelledPolicy,
    snapshot: Snapshot,
}

impl<C> AppManager<C>
where
    C: Send + Sync + 'static,
{
    /// Creates a manager and performs the initial scan.
    pub async fn new(
        cluster: C,
        namespace: impl Into<String>,
        kinds: Arc<KindRegistry<C>>,
        policy: UnlabelledPolicy,
    ) -> Result<Self, ScanError> {
        let mut manager = Self {
            cluster,
            namespace: namespace.into(),
            kinds,
            policy,
            snapshot: Snapshot::default(),
        };
        manager.scan().await?;
        Ok(manager)
    }

    /// Discards the current snapshot and rebuilds it from the cluster.
    pub async fn scan(&mut self) -> Result<&Snapshot, ScanError> {
        let discovered = scanner::scan(&self.kinds, &self.cluster, &self.namespace).await?;
        self.snapshot = apps::group(&discovered, self.policy);
        Ok(&self.snapshot)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[cfg(test)]
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn set_latest(&mut self, registry: &str, repository: &str, version: &str) {
        self.snapshot
            .set_latest(&ImageIdentifier::new(registry, repository), version);
    }

    pub fn apply_latest(&mut self, latest: &LatestTags) {
        self.snapshot = apps::apply_latest(&self.snapshot, latest);
    }

    pub async fn upgrade(&self, change_set: &ChangeSet) -> UpgradeReport {
        upgrade::upgrade(&self.kinds, &self.cluster, &self.namespace, change_set).await
    }
}
