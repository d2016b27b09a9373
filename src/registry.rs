//! Image registry access over the OCI distribution API.

use crate::apps::LatestTags;
use crate::config;
use crate::image::ImageIdentifier;
use crate::secret_string::SecretString;
use crate::version;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, HeaderMap, LINK};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static NEXT_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).ok());

/// Source of repositories and their tags. Implementations resolve pagination, so every
/// call returns the complete list.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Registry host as it appears in image references.
    fn host(&self) -> &str;
    async fn repositories(&self) -> Result<Vec<String>>;
    async fn tags(&self, repository: &str) -> Result<Vec<String>>;
}

/// A repository with its tags and the most recent of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub latest_tag: String,
    pub tags: Vec<String>,
}

enum Auth {
    Anonymous,
    Basic {
        username: String,
        password: SecretString,
    },
    Bearer(SecretString),
}

pub struct OciRegistry {
    host: String,
    base_url: String,
    auth: Auth,
    client: Client,
}

#[derive(Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub fn create_client() -> Result<Client> {
    info!("Initializing OCI Registry HTTP client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    Client::builder()
        .user_agent(concat!("kube-autodeploy/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

impl OciRegistry {
    pub fn new(registry: &config::Registry, client: Client) -> Result<Self> {
        let scheme = if registry.insecure { "http" } else { "https" };
        let auth = match (registry.username.clone(), registry.resolved_token()?) {
            (Some(username), Some(password)) => Auth::Basic { username, password },
            (None, Some(token)) => Auth::Bearer(token),
            (_, None) => Auth::Anonymous,
        };
        Ok(Self {
            host: registry.host.clone(),
            base_url: format!("{}://{}", scheme, registry.host),
            auth,
            client,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Anonymous => request,
            Auth::Basic { username, password } => {
                request.basic_auth(username, Some(password.expose_secret()))
            }
            Auth::Bearer(token) => request.bearer_auth(token.expose_secret()),
        }
    }

    async fn get(&self, url: &str) -> Result<Response> {
        debug!("Fetching {}", url);
        let response = self
            .authorized(self.client.get(url).header(ACCEPT, "application/json"))
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Registry {} returned error status {} for {}",
                self.host,
                response.status(),
                url
            );
        }
        Ok(response)
    }

    /// Follows `Link: <...>; rel="next"` headers until the last page. A link back to an
    /// already fetched page ends the walk.
    async fn get_all<T, F>(&self, path: &str, mut extract: F) -> Result<Vec<String>>
    where
        T: DeserializeOwned + Send,
        F: FnMut(T) -> Vec<String> + Send,
    {
        let mut items = Vec::new();
        let mut url = format!("{}{}", self.base_url, path);
        let mut visited = HashSet::new();
        loop {
            visited.insert(url.clone());
            let response = self.get(&url).await?;
            let next = next_link(response.headers()).map(|link| self.resolve(&link));
            let page: T = response
                .json()
                .await
                .with_context(|| format!("Failed to decode response of {}", url))?;
            items.extend(extract(page));
            match next {
                Some(next) if visited.contains(&next) => {
                    warn!("Registry {} links back to {}, stopping pagination", self.host, next);
                    return Ok(items);
                }
                Some(next) => url = next,
                None => return Ok(items),
            }
        }
    }

    fn resolve(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}{}", self.base_url, link)
        }
    }
}

#[async_trait]
impl ImageRegistry for OciRegistry {
    fn host(&self) -> &str {
        &self.host
    }

    async fn repositories(&self) -> Result<Vec<String>> {
        self.get_all("/v2/_catalog", |catalog: Catalog| catalog.repositories)
            .await
            .with_context(|| format!("Failed to list repositories of {}", self.host))
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        let tags = self
            .get_all(&format!("/v2/{}/tags/list", repository), |list: TagList| {
                list.tags.unwrap_or_default()
            })
            .await
            .with_context(|| format!("Failed to list tags of {}/{}", self.host, repository))?;
        Ok(tags
            .into_iter()
            .filter(|tag| !version::is_floating(tag))
            .collect())
    }
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    let re = NEXT_LINK.as_ref()?;
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| re.captures(value).map(|caps| caps[1].to_string()))
}

/// Lists every repository with its tags and latest tag.
pub async fn fetch_all(registry: &dyn ImageRegistry) -> Result<Vec<Repository>> {
    let names = registry.repositories().await?;
    info!("Found {} repositories in {}", names.len(), registry.host());

    let mut repositories = Vec::with_capacity(names.len());
    for name in names {
        let tags = registry.tags(&name).await?;
        let latest_tag = version::latest(&tags);
        debug!("Repository {} has {} tags, latest {}", name, tags.len(), latest_tag);
        repositories.push(Repository {
            name,
            latest_tag,
            tags,
        });
    }
    Ok(repositories)
}

/// Latest tag per image identity. Repositories without tags are left out.
pub fn latest_tags(host: &str, repositories: &[Repository]) -> LatestTags {
    repositories
        .iter()
        .filter(|repo| !repo.latest_tag.is_empty())
        .map(|repo| {
            (
                ImageIdentifier::new(host, &repo.name),
                repo.latest_tag.clone(),
            )
        })
        .collect()
}
