use crate::cluster;
use crate::config;
use crate::state::AppContext;
use anyhow::Result;
use std::path::Path;
use tracing::warn;

/// Prints the registry profile of the current kube context, or links it to `profile`.
pub fn run(ctx: &AppContext, profile: Option<&str>) -> Result<()> {
    let context = cluster::current_context()?;
    match profile {
        None => println!("{}", ctx.config.profile_for(&context).unwrap_or_default()),
        Some(profile) => set_profile(&ctx.config_path, &context, profile)?,
    }
    Ok(())
}

fn set_profile(path: &Path, context: &str, profile: &str) -> Result<()> {
    let mut config = config::load_config(path)?;
    if !config.registries.contains_key(profile) {
        warn!("Profile {} has no registry configured in {}", profile, path.display());
    }
    config.set_profile(context, profile);
    config::save_config(path, &config)
}
