use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Image repository -> webhook URL receiving a message when the image is deployed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Webhooks {
    hooks: BTreeMap<String, String>,
}

pub fn load_webhooks<P: AsRef<Path>>(path: P) -> Result<Webhooks> {
    let path = path.as_ref();
    debug!("Configuring webhooks from file {}", path.display());
    let yaml_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read webhooks file: {}", path.display()))?;
    let webhooks: Webhooks = serde_yaml_ng::from_str(&yaml_str)
        .with_context(|| format!("Failed to parse webhooks file {}", path.display()))?;
    info!("{} webhooks configured", webhooks.len());
    Ok(webhooks)
}

impl Webhooks {
    pub fn url_for(&self, repository: &str) -> Option<&str> {
        self.hooks.get(repository).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Posts a Slack-compatible `{"text": ...}` message to the hook of `repository`.
    /// Delivery failures are logged, never returned.
    pub async fn notify(&self, client: &Client, repository: &str, text: &str) {
        let Some(url) = self.url_for(repository) else {
            return;
        };
        debug!("Notifying webhook for {}", repository);
        let result = client
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(e) = result {
            warn!("Failed to notify webhook for {}: {}", repository, e);
        }
    }
}
