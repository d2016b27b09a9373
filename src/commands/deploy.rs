use crate::apps::{App, ChangeSet, Snapshot};
use crate::cluster::{self, KubeCluster};
use crate::manager::AppManager;
use crate::registry::{self, ImageRegistry};
use crate::state::AppContext;
use crate::upgrade::UpgradeReport;
use anyhow::{Context, Result};
use globset::Glob;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// Which change sets a deploy run upgrades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every change set needing an update.
    All,
    /// Change sets whose repository matches a name or glob.
    Image(String),
    /// Ask on stdin.
    Interactive,
}

impl Selection {
    pub fn from_arg(image: Option<&str>) -> Self {
        match image {
            Some("-") => Selection::All,
            Some(image) => Selection::Image(image.to_string()),
            None => Selection::Interactive,
        }
    }
}

/// Scans `namespace`, compares it with the registry and upgrades the selected change sets.
/// Returns the combined report; an error is returned when any container failed.
pub async fn run(ctx: &AppContext, namespace: &str, selection: Selection) -> Result<UpgradeReport> {
    let registry = ctx.open_registry()?;
    let repositories = registry::fetch_all(&registry).await?;
    let latest = registry::latest_tags(registry.host(), &repositories);

    let cluster = cluster::create_client().await?;
    let kinds = Arc::new(cluster::default_kinds(ctx.config.app_label()));
    let mut manager = AppManager::new(cluster, namespace, kinds, ctx.config.unlabelled)
        .await
        .context("Failed to scan cluster")?;
    manager.apply_latest(&latest);
    info!(
        "Found {} applications in namespace {}",
        manager.snapshot().apps.len(),
        manager.namespace()
    );

    let snapshot = manager.snapshot();
    for skipped in &snapshot.skipped {
        warn!(
            "Skipped {} {}/{} ({}): {}",
            skipped.kind, skipped.resource, skipped.container, skipped.image, skipped.reason
        );
    }

    let chosen = match selection {
        Selection::All => snapshot
            .needing_update()
            .map(|(_, cs)| cs.clone())
            .collect(),
        Selection::Image(pattern) => select_image(snapshot, &pattern)?,
        Selection::Interactive => choose(snapshot).await?,
    };

    if chosen.is_empty() {
        println!("No containers require upgrade");
        return Ok(UpgradeReport::default());
    }

    let report = upgrade_all(ctx, &manager, &chosen).await;
    for outcome in &report.outcomes {
        println!("    {}", outcome);
    }

    let failed = report.failed().count();
    println!(
        "Upgraded {} containers, {} failed",
        report.succeeded().count(),
        failed
    );
    if !report.is_success() {
        anyhow::bail!("{} containers failed to upgrade", failed);
    }
    Ok(report)
}

async fn upgrade_all(
    ctx: &AppContext,
    manager: &AppManager<KubeCluster>,
    change_sets: &[ChangeSet],
) -> UpgradeReport {
    let mut report = UpgradeReport::default();
    for change_set in change_sets {
        println!(
            "Updating image {} to {}:",
            change_set.image_id.repository, change_set.update_to
        );
        let result = manager.upgrade(change_set).await;

        let upgraded: Vec<_> = result
            .succeeded()
            .map(|o| o.container_id.resource.as_str())
            .collect();
        if !upgraded.is_empty() {
            let text = format!("{} updated to {}", upgraded.join(", "), change_set.update_to);
            ctx.webhooks
                .notify(&ctx.http_client, &change_set.image_id.repository, &text)
                .await;
        }
        report.extend(result);
    }
    report
}

fn select_image(snapshot: &Snapshot, pattern: &str) -> Result<Vec<ChangeSet>> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("Invalid image pattern {}", pattern))?
        .compile_matcher();

    let matching: Vec<_> = snapshot.find_by_repository(&matcher).collect();
    if matching.is_empty() {
        anyhow::bail!("Image {} not known", pattern);
    }

    let chosen: Vec<_> = matching
        .into_iter()
        .filter(|(app, cs)| {
            if !cs.needs_update {
                info!("{} in {} does not require update", cs.image_id, display_name(app));
            }
            cs.needs_update
        })
        .map(|(_, cs)| cs.clone())
        .collect();
    Ok(chosen)
}

async fn choose(snapshot: &Snapshot) -> Result<Vec<ChangeSet>> {
    let candidates: Vec<_> = snapshot.needing_update().collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    for (index, (app, cs)) in candidates.iter().enumerate() {
        println!("{}", format_choice(index, app, cs));
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;

    let mut input = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut input)
        .await
        .context("Failed to read selection")?;

    Ok(parse_selection(&input, candidates.len())?
        .into_iter()
        .map(|index| candidates[index].1.clone())
        .collect())
}

fn display_name(app: &App) -> &str {
    if app.name.is_empty() { "<unlabelled>" } else { &app.name }
}

fn format_choice(index: usize, app: &App, cs: &ChangeSet) -> String {
    let kinds: Vec<_> = cs
        .containers
        .iter()
        .map(|(kind, containers)| format!("{} {}", containers.len(), kind))
        .collect();
    format!(
        "{}> {:<12} {:<30} [{:<16}] <- [{:<16}] ({})",
        index,
        display_name(app),
        cs.image_id.repository,
        cs.update_to,
        cs.versions().join(", "),
        kinds.join(", ")
    )
}

/// Parses a comma separated list of indices below `count`.
fn parse_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let mut chosen = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let index: usize = part
            .parse()
            .with_context(|| format!("Invalid selection {}", part))?;
        if index >= count {
            anyhow::bail!("Selection {} is out of range, expected 0 to {}", index, count - 1);
        }
        if !chosen.contains(&index) {
            chosen.push(index);
        }
    }
    Ok(chosen)
}
