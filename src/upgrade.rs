use crate::apps::ChangeSet;
use crate::image::ContainerIdentifier;
use crate::kinds::KindRegistry;
use anyhow::anyhow;
use std::fmt;
use tracing::{error, info, warn};

/// Result of upgrading one container.
#[derive(Debug)]
pub struct ContainerOutcome {
    pub kind: String,
    pub container_id: ContainerIdentifier,
    pub target: String,
    pub result: anyhow::Result<()>,
}

/// Per-container outcomes of upgrading one change set.
#[derive(Debug, Default)]
pub struct UpgradeReport {
    pub outcomes: Vec<ContainerOutcome>,
}

impl UpgradeReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ContainerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ContainerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn extend(&mut self, other: UpgradeReport) {
        self.outcomes.extend(other.outcomes);
    }
}

impl fmt::Display for ContainerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(
                f,
                "{} {} image -> {}",
                self.kind, self.container_id, self.target
            ),
            Err(e) => write!(
                f,
                "{} {} FAILED ({}): {:#}",
                self.kind, self.container_id, self.target, e
            ),
        }
    }
}

/// Upgrades every container of `change_set` through its kind's upgrade operation.
///
/// All containers are attempted even when some fail, so the report lists every failure
/// of the batch. Containers upgraded before a failure stay upgraded.
pub async fn upgrade<C>(
    kinds: &KindRegistry<C>,
    cluster: &C,
    namespace: &str,
    change_set: &ChangeSet,
) -> UpgradeReport
where
    C: Send + Sync + 'static,
{
    let mut report = UpgradeReport::default();
    if !change_set.needs_update {
        warn!(
            "Image {} does not require an update, skipping",
            change_set.image_id
        );
        return report;
    }

    let target = change_set.registry_path();
    info!(
        "Updating {} containers of image {} to {}",
        change_set.container_count(),
        change_set.image_id,
        target
    );

    for (kind, container) in change_set.all_containers() {
        let result = match kinds.get(kind) {
            Some(resource_kind) => {
                resource_kind
                    .upgrade_container(cluster, namespace, change_set, container)
                    .await
            }
            None => Err(anyhow!("no resource kind {} is registered", kind)),
        };

        let outcome = ContainerOutcome {
            kind: kind.to_string(),
            container_id: container.container_id.clone(),
            target: target.clone(),
            result,
        };
        match &outcome.result {
            Ok(()) => info!("{}", outcome),
            Err(_) => error!("{}", outcome),
        }
        report.outcomes.push(outcome);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::tests::container;
    use crate::image::ImageIdentifier;
    use crate::testing::{FakeCluster, FakeKind};

    fn foo() -> ImageIdentifier {
        ImageIdentifier::new("reg", "foo")
    }

    fn setup() -> (KindRegistry<FakeCluster>, ChangeSet) {
        let mut registry = KindRegistry::new();
        registry
            .register(FakeKind::new("Deployment"))
            .register(FakeKind::new("Cronjob"));

        let mut cs = ChangeSet::new(foo());
        cs.add_container("Deployment", container("shop", "web", &foo(), "1.0.0"));
        cs.add_container("Deployment", container("shop", "api", &foo(), "1.0.0"));
        cs.add_container("Cronjob", container("shop", "cleanup", &foo(), "1.0.0"));
        cs.set_latest("2.0.0");
        (registry, cs)
    }

    fn cluster() -> FakeCluster {
        FakeCluster::new()
            .with_workload("Deployment", "web", "shop", &[("app", "reg/foo:1.0.0")])
            .with_workload("Deployment", "api", "shop", &[("app", "reg/foo:1.0.0")])
            .with_workload("Cronjob", "cleanup", "shop", &[("app", "reg/foo:1.0.0")])
    }

    #[tokio::test]
    async fn test_upgrade_patches_every_container() {
        let (registry, cs) = setup();
        let cluster = cluster();

        let report = upgrade(&registry, &cluster, "default", &cs).await;
        assert!(report.is_success());
        assert_eq!(report.succeeded().count(), 3);
        assert_eq!(cluster.calls().len(), 3);
        assert_eq!(
            cluster.image_of("Cronjob", "cleanup", "app").as_deref(),
            Some("reg/foo:2.0.0")
        );
    }

    #[tokio::test]
    async fn test_upgrade_continues_after_failure() {
        let (registry, cs) = setup();
        let cluster = cluster().rejecting_writes_to("web");

        let report = upgrade(&registry, &cluster, "default", &cs).await;
        assert!(!report.is_success());
        let failed: Vec<_> = report
            .failed()
            .map(|o| o.container_id.resource.as_str())
            .collect();
        assert_eq!(failed, vec!["web"]);
        assert_eq!(report.succeeded().count(), 2);
        assert_eq!(
            cluster.image_of("Deployment", "api", "app").as_deref(),
            Some("reg/foo:2.0.0")
        );
        assert_eq!(
            cluster.image_of("Deployment", "web", "app").as_deref(),
            Some("reg/foo:1.0.0")
        );
    }

    #[tokio::test]
    async fn test_upgrade_reports_missing_resource() {
        let (registry, cs) = setup();
        let cluster = FakeCluster::new()
            .with_workload("Deployment", "web", "shop", &[("app", "reg/foo:1.0.0")])
            .with_workload("Deployment", "api", "shop", &[("app", "reg/foo:1.0.0")]);

        let report = upgrade(&registry, &cluster, "default", &cs).await;
        let failed: Vec<_> = report.failed().map(|o| o.kind.as_str()).collect();
        assert_eq!(failed, vec!["Cronjob"]);
    }

    #[tokio::test]
    async fn test_upgrade_reports_unregistered_kind() {
        let (_, cs) = setup();
        let mut registry = KindRegistry::new();
        registry.register(FakeKind::new("Deployment"));

        let report = upgrade(&registry, &cluster(), "default", &cs).await;
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.succeeded().count(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_skips_up_to_date_change_set() {
        let (registry, mut cs) = setup();
        cs.set_latest("1.0.0");
        let cluster = cluster();

        let report = upgrade(&registry, &cluster, "default", &cs).await;
        assert!(report.outcomes.is_empty());
        assert!(cluster.calls().is_empty());
    }
}
