//! Applications and their change sets.
//!
//! Containers discovered in the cluster are folded into applications (by app label) and,
//! within each application, into change sets sharing one image identity. A change set is
//! the unit of an upgrade decision: every container in it is moved to the same tag.

use crate::image::{ContainerIdentifier, ImageIdentifier};
use crate::version;
use globset::GlobMatcher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Latest published tag per image identity, as reported by the registry.
pub type LatestTags = BTreeMap<ImageIdentifier, String>;

/// A container slot running an image, as found in one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub app: String,
    pub container_id: ContainerIdentifier,
    pub image_id: ImageIdentifier,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub image_id: ImageIdentifier,
    pub needs_update: bool,
    pub update_to: String,
    /// Containers using this image, keyed by workload kind, in discovery order.
    pub containers: BTreeMap<String, Vec<Container>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    pub name: String,
    pub change_sets: BTreeMap<ImageIdentifier, ChangeSet>,
}

/// A container whose image reference could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedImage {
    pub kind: String,
    pub resource: String,
    pub container: String,
    pub image: String,
    pub reason: String,
}

/// Output of a scan: every container found, labelled with the kind that owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub containers: Vec<(String, Container)>,
    pub skipped: Vec<SkippedImage>,
}

/// What to do with containers whose workload has no app label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlabelledPolicy {
    /// Group them under the application named `""`.
    #[default]
    Group,
    /// Leave them out of the snapshot and report them as skipped.
    Skip,
}

/// Immutable grouping of a namespace into applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub apps: BTreeMap<String, App>,
    pub skipped: Vec<SkippedImage>,
}

impl ChangeSet {
    pub fn new(image_id: ImageIdentifier) -> Self {
        Self {
            image_id,
            needs_update: false,
            update_to: String::new(),
            containers: BTreeMap::new(),
        }
    }

    pub fn add_container(&mut self, kind: &str, container: Container) {
        debug_assert_eq!(container.image_id, self.image_id);
        self.containers
            .entry(kind.to_string())
            .or_default()
            .push(container);
    }

    /// Distinct versions currently deployed, sorted.
    pub fn versions(&self) -> Vec<String> {
        self.all_containers()
            .map(|(_, c)| c.current.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn all_containers(&self) -> impl Iterator<Item = (&str, &Container)> {
        self.containers
            .iter()
            .flat_map(|(kind, containers)| containers.iter().map(move |c| (kind.as_str(), c)))
    }

    pub fn container_count(&self) -> usize {
        self.containers.values().map(Vec::len).sum()
    }

    /// The reference every container in this change set should run.
    pub fn registry_path(&self) -> String {
        self.image_id.with_tag(&self.update_to)
    }

    /// Records `version` as the upgrade target and recomputes whether any container is
    /// behind it. Semantic comparison is used when `version` parses as a semantic
    /// version, otherwise any differing tag counts as outdated. Floating and unparsable
    /// tags are always considered outdated against a semantic target.
    pub fn set_latest(&mut self, version: &str) {
        self.update_to = version.to_string();
        self.needs_update = match version::parse(version) {
            None => self.versions().iter().any(|current| current != version),
            Some(target) => self.versions().iter().any(|current| {
                if version::is_floating(current) {
                    return true;
                }
                match version::parse(current) {
                    Some(current) => current < target,
                    None => true,
                }
            }),
        };
    }
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            change_sets: BTreeMap::new(),
        }
    }

    /// Adds `container` to the change set of its image, creating it when needed.
    pub fn add_container(&mut self, kind: &str, container: Container) {
        self.change_sets
            .entry(container.image_id.clone())
            .or_insert_with(|| ChangeSet::new(container.image_id.clone()))
            .add_container(kind, container);
    }

    pub fn set_latest(&mut self, image_id: &ImageIdentifier, version: &str) {
        if let Some(change_set) = self.change_sets.get_mut(image_id) {
            change_set.set_latest(version);
        }
    }
}

impl Snapshot {
    pub fn add_container(&mut self, kind: &str, container: Container) {
        self.apps
            .entry(container.app.clone())
            .or_insert_with(|| App::new(container.app.clone()))
            .add_container(kind, container);
    }

    /// Sets the latest version on every change set of `image_id`, across all apps.
    pub fn set_latest(&mut self, image_id: &ImageIdentifier, version: &str) {
        for app in self.apps.values_mut() {
            app.set_latest(image_id, version);
        }
    }

    pub fn change_sets(&self) -> impl Iterator<Item = (&App, &ChangeSet)> {
        self.apps
            .values()
            .flat_map(|app| app.change_sets.values().map(move |cs| (app, cs)))
    }

    pub fn needing_update(&self) -> impl Iterator<Item = (&App, &ChangeSet)> {
        self.change_sets().filter(|(_, cs)| cs.needs_update)
    }

    /// Change sets whose repository matches `pattern`.
    pub fn find_by_repository<'a>(
        &'a self,
        pattern: &'a GlobMatcher,
    ) -> impl Iterator<Item = (&'a App, &'a ChangeSet)> {
        self.change_sets()
            .filter(move |(_, cs)| pattern.is_match(&cs.image_id.repository))
    }
}

/// Folds discovered containers into applications. Containers keep their discovery
/// order within each kind, so the same input always yields the same snapshot.
pub fn group(discovered: &Discovered, policy: UnlabelledPolicy) -> Snapshot {
    let mut snapshot = Snapshot {
        apps: BTreeMap::new(),
        skipped: discovered.skipped.clone(),
    };

    for (kind, container) in &discovered.containers {
        if container.app.is_empty() && policy == UnlabelledPolicy::Skip {
            debug!(
                "Skipping {} {} without app label",
                kind, container.container_id
            );
            snapshot.skipped.push(SkippedImage {
                kind: kind.clone(),
                resource: container.container_id.resource.clone(),
                container: container.container_id.container.clone(),
                image: container.image_id.with_tag(&container.current),
                reason: "workload has no app label".to_string(),
            });
            continue;
        }
        snapshot.add_container(kind, container.clone());
    }

    if let Some(app) = snapshot.apps.get("") {
        warn!(
            "{} change sets belong to workloads without an app label, grouped under the unnamed application",
            app.change_sets.len()
        );
    }

    snapshot
}

/// Returns a copy of `snapshot` with every change set diffed against the registry's
/// latest tags. Change sets whose image is unknown to the registry are left untouched.
pub fn apply_latest(snapshot: &Snapshot, latest: &LatestTags) -> Snapshot {
    let mut updated = snapshot.clone();
    for (image_id, version) in latest {
        updated.set_latest(image_id, version);
    }
    updated
}
