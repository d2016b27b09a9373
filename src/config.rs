use crate::apps::UnlabelledPolicy;
use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = ".kube-autodeploy.yaml";
pub const DEFAULT_APP_LABEL: &str = "app";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Kube context name -> registry profile name.
    #[serde(default)]
    pub profiles: BTreeMap<String, String>,
    #[serde(default)]
    pub registries: BTreeMap<String, Registry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_label: Option<String>,
    #[serde(default)]
    pub unlabelled: UnlabelledPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Registry {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
}

impl Config {
    pub fn app_label(&self) -> &str {
        self.app_label.as_deref().unwrap_or(DEFAULT_APP_LABEL)
    }

    pub fn profile_for(&self, context: &str) -> Option<&str> {
        self.profiles.get(context).map(String::as_str)
    }

    pub fn set_profile(&mut self, context: &str, profile: &str) {
        info!("Setting profile to {} for context {}", profile, context);
        self.profiles.insert(context.to_string(), profile.to_string());
    }

    /// Registry linked to `context`. Without a linked profile, a single configured
    /// registry is used as the default.
    pub fn registry_for(&self, context: &str) -> Result<(&str, &Registry)> {
        match self.profile_for(context) {
            Some(profile) => self
                .registries
                .get_key_value(profile)
                .map(|(name, registry)| (name.as_str(), registry))
                .with_context(|| {
                    format!("Profile {} of context {} has no registry configured", profile, context)
                }),
            None if self.registries.len() == 1 => self
                .registries
                .iter()
                .next()
                .map(|(name, registry)| (name.as_str(), registry))
                .context("No registry configured"),
            None => anyhow::bail!(
                "No profile configured for context {}, run `kube-autodeploy config PROFILE`",
                context
            ),
        }
    }
}

impl Registry {
    /// Token with `${VAR}` placeholders resolved from the environment.
    pub fn resolved_token(&self) -> Result<Option<SecretString>> {
        self.token
            .as_ref()
            .map(|token| expand_env_vars(token.expose_secret()).map(SecretString::new))
            .transpose()
            .with_context(|| format!("Failed to resolve token of registry {}", self.host))
    }
}

/// Home directory from `HOME`, falling back to `USERPROFILE` on Windows.
pub fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .or_else(|| env::var_os("USERPROFILE").filter(|h| !h.is_empty()))
        .map(PathBuf::from)
}

pub fn default_config_path() -> Result<PathBuf> {
    home_dir()
        .map(|home| home.join(CONFIG_FILE_NAME))
        .context("Unable to determine home directory from HOME or USERPROFILE")
}

/// Loads the config file. A missing file yields an empty configuration.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        debug!("Config file {} does not exist, using defaults", path.display());
        return Ok(Config::default());
    }

    info!("Loading config from file {}", path.display());
    let yaml_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = serde_yaml_ng::from_str(&yaml_str)
        .with_context(|| format!("Failed to parse YAML config {}", path.display()))?;

    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(path: P, config: &Config) -> Result<()> {
    let path = path.as_ref();
    let yaml_str = serde_yaml_ng::to_string(config).context("Failed to serialize config")?;
    fs::write(path, yaml_str)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    info!("Wrote config file {}", path.display());
    Ok(())
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first missing variable.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var_name) => anyhow::bail!("Missing environment variable: {}", var_name),
        None => Ok(result.into_owned()),
    }
}
