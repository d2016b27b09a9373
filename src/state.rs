use crate::cluster;
use crate::config::{self, Config};
use crate::registry::{self, OciRegistry};
use crate::webhook::{self, Webhooks};
use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info};

/// Everything a command needs besides its own arguments.
#[derive(Clone)]
pub struct AppContext {
    pub(crate) config_path: PathBuf,
    pub(crate) config: Config,
    pub(crate) webhooks: Webhooks,
    pub(crate) http_client: reqwest::Client,
}

impl AppContext {
    pub fn load(config_path: Option<PathBuf>, webhooks_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => config::default_config_path()?,
        };
        let config = config::load_config(&config_path)?;
        let webhooks = match webhooks_path {
            Some(path) => webhook::load_webhooks(path)?,
            None => Webhooks::default(),
        };
        Ok(Self {
            config_path,
            config,
            webhooks,
            http_client: registry::create_client()?,
        })
    }

    /// Registry profile linked to the current kube context. Without a kubeconfig, as
    /// when running in-cluster, only a sole configured registry can be used.
    pub fn registry_config(&self) -> Result<(&str, &config::Registry)> {
        let context = cluster::current_context().unwrap_or_else(|e| {
            debug!("No current kube context: {:#}", e);
            String::new()
        });
        let (profile, registry) = self.config.registry_for(&context)?;
        info!("Using registry {} of profile {}", registry.host, profile);
        Ok((profile, registry))
    }

    pub fn open_registry(&self) -> Result<OciRegistry> {
        let (_, registry) = self.registry_config()?;
        OciRegistry::new(registry, self.http_client.clone())
    }
}
