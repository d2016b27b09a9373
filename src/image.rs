//! Image references as found in pod specs, and the identities derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Tag assumed when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Identifies an image family independent of its tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageIdentifier {
    pub registry: String,
    pub repository: String,
}

/// Identifies one container slot inside a workload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerIdentifier {
    pub resource: String,
    pub container: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageParseError {
    #[error("image reference is empty")]
    Empty,
    #[error("digest references are not allowed: {0}")]
    DigestNotAllowed(String),
    #[error("registry is missing: {0}")]
    MissingRegistry(String),
    #[error("repository is missing: {0}")]
    MissingRepository(String),
    #[error("tag is missing: {0}")]
    MissingTag(String),
}

impl ImageIdentifier {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
        }
    }

    /// Full reference of this image at the given tag.
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{}", self, tag)
    }
}

impl fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry.is_empty() {
            write!(f, "{}", self.repository)
        } else {
            write!(f, "{}/{}", self.registry, self.repository)
        }
    }
}

impl ContainerIdentifier {
    pub fn new(resource: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ContainerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource, self.container)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier().with_tag(&self.tag))
    }
}

impl ImageReference {
    /// Parses `[registry/]repository[:tag]`. The registry is everything before the
    /// first slash, so nested repositories such as `team/app` are kept intact.
    pub fn parse(s: &str) -> Result<Self, ImageParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ImageParseError::Empty);
        }
        // digest references are not supported
        if s.contains('@') {
            return Err(ImageParseError::DigestNotAllowed(s.to_string()));
        }

        // A colon only denotes a tag when it follows the last slash, otherwise it is a registry port
        let last_slash = s.rfind('/');
        let (without_tag, tag) = match s.rfind(':') {
            Some(pos) if last_slash.is_none_or(|slash| pos > slash) => (&s[..pos], &s[pos + 1..]),
            _ => (s, DEFAULT_TAG),
        };
        if tag.is_empty() {
            return Err(ImageParseError::MissingTag(s.to_string()));
        }

        let (registry, repository) = match without_tag.split_once('/') {
            Some((registry, repository)) => {
                if registry.is_empty() {
                    return Err(ImageParseError::MissingRegistry(s.to_string()));
                }
                (registry, repository)
            }
            None => ("", without_tag),
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(ImageParseError::MissingRepository(s.to_string()));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn identifier(&self) -> ImageIdentifier {
        ImageIdentifier::new(&self.registry, &self.repository)
    }
}
