use crate::apps::{Discovered, SkippedImage};
use crate::kinds::KindRegistry;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to fetch {kind} resources in namespace {namespace}")]
    Fetch {
        kind: String,
        namespace: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Collects the containers of every registered kind in `namespace`.
///
/// A failing fetch aborts the whole scan: upgrading from a partial view could silently
/// leave workloads behind. Containers with unparsable images are skipped and reported.
pub async fn scan<C>(
    kinds: &KindRegistry<C>,
    cluster: &C,
    namespace: &str,
) -> Result<Discovered, ScanError>
where
    C: Send + Sync + 'static,
{
    let mut discovered = Discovered::default();
    debug!(
        "Scanning namespace {} for {}",
        namespace,
        kinds.names().collect::<Vec<_>>().join(", ")
    );

    for kind in kinds.kinds() {
        let kind_name = kind.kind_name().to_string();
        let generated = kind
            .discover(cluster, namespace)
            .await
            .map_err(|source| ScanError::Fetch {
                kind: kind_name.clone(),
                namespace: namespace.to_string(),
                source,
            })?;

        debug!(
            "Found {} containers of kind {} in namespace {}",
            generated.len(),
            kind_name,
            namespace
        );

        for entry in generated {
            match entry {
                Ok(container) => discovered.containers.push((kind_name.clone(), container)),
                Err(invalid) => {
                    warn!("Skipping {} {}", kind_name, invalid);
                    discovered.skipped.push(SkippedImage {
                        kind: kind_name.clone(),
                        resource: invalid.container_id.resource,
                        container: invalid.container_id.container,
                        image: invalid.image,
                        reason: invalid.source.to_string(),
                    });
                }
            }
        }
    }

    info!(
        "Scanned {} kinds in namespace {}: {} containers, {} skipped",
        kinds.len(),
        namespace,
        discovered.containers.len(),
        discovered.skipped.len()
    );

    Ok(discovered)
}
