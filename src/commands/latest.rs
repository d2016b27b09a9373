use crate::registry;
use crate::state::AppContext;
use anyhow::Result;

/// Prints every repository of the registry with its latest tag.
pub async fn run(ctx: &AppContext) -> Result<()> {
    let registry = ctx.open_registry()?;
    for repository in registry::fetch_all(&registry).await? {
        println!("{:<30} {}", repository.name, repository.latest_tag);
    }
    Ok(())
}
